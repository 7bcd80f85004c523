//! Logical packet connections.
//!
//! A [`PacketConnection`] is a multicast-capable channel named by a
//! [`ConnectionId`]. It outlives any single raw link: the local node binds a
//! link into it once a handshake completes and swaps in a replacement when
//! the route changes, while the application keeps holding the same handle.
//!
//! # Lifecycle
//!
//! ```text
//! ┌─────────┐  link bound   ┌────────┐
//! │ Pending ├──────────────►│ Active │◄─────────┐
//! └────┬────┘               └───┬────┘          │ link swapped in
//!      │                        │ route change  │
//!      │                        │ or link lost  │
//!      │                        ▼               │
//!      │                 ┌──────────────┐       │
//!      │                 │ Reconnecting ├───────┘
//!      │                 └──────┬───────┘
//!      │  close                 │ close
//!      ▼                        ▼
//! ┌──────────────────────────────────┐
//! │              Closed              │
//! └──────────────────────────────────┘
//! ```
//!
//! Handles are `Rc` based and must stay on the node's serialization context.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use corelib::frame::{read_frame, write_frame, FrameError};
use corelib::{BoxedLink, ConnectionId, NodeId, NodeSet};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};

use crate::error::{MeshError, Result};
use crate::peer::WeakRemotePeer;

/// Which side created the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Created locally through `connect`.
    Established,
    /// Created when a remote node's handshake named an unknown identifier.
    Incoming,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Established => "established",
            Direction::Incoming => "incoming",
        }
    }
}

/// Connection state as seen by the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, no link bound yet.
    Pending,
    /// A handshaken link is bound.
    Active,
    /// The link was lost or a replacement was requested; identity retained.
    Reconnecting,
    /// Closed; the identifier is released.
    Closed,
}

/// Callbacks from a connection into the node that registered it.
pub(crate) trait ConnectionOwner {
    /// The connection closed and must leave every registry.
    fn connection_closed(&self, connection: &PacketConnection);

    /// The application asked for a fresh link.
    fn reconnect_requested(self: Rc<Self>, connection: &PacketConnection) -> Result<()>;
}

/// Result of offering a link to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindOutcome {
    /// The link is now bound. `swapped` when it replaced an earlier link.
    Bound { swapped: bool },
    /// A newer attempt already bound its link; this one was dropped.
    Superseded,
    /// The connection closed meanwhile; the link was dropped.
    Closed,
}

/// A bound link split so a pending receive never blocks a send.
struct BoundLink {
    reader: Mutex<ReadHalf<BoxedLink>>,
    writer: Mutex<WriteHalf<BoxedLink>>,
}

impl BoundLink {
    fn new(link: BoxedLink) -> Rc<Self> {
        let (reader, writer) = tokio::io::split(link);
        Rc::new(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }
}

type SharedLink = Rc<BoundLink>;

#[derive(Default)]
struct LinkSlot {
    link: Option<SharedLink>,
    /// Bumped on every bind.
    generation: u64,
    /// Attempt number of the bound link.
    bound_attempt: u64,
}

struct Inner {
    id: ConnectionId,
    destinations: NodeSet,
    direction: Direction,
    max_frame_size: usize,
    state: watch::Sender<ConnectionState>,
    slot: RefCell<LinkSlot>,
    attempts: Cell<u64>,
    peers: RefCell<Vec<WeakRemotePeer>>,
    owner: RefCell<Option<Weak<dyn ConnectionOwner>>>,
}

/// Handle to a logical connection.
///
/// Cloning is cheap and every clone refers to the same connection; use
/// [`PacketConnection::ptr_eq`] to compare identity.
#[derive(Clone)]
pub struct PacketConnection {
    inner: Rc<Inner>,
}

impl PacketConnection {
    pub(crate) fn new(
        id: ConnectionId,
        destinations: NodeSet,
        direction: Direction,
        max_frame_size: usize,
        owner: Option<Weak<dyn ConnectionOwner>>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Pending);
        Self {
            inner: Rc::new(Inner {
                id,
                destinations,
                direction,
                max_frame_size,
                state,
                slot: RefCell::new(LinkSlot::default()),
                attempts: Cell::new(0),
                peers: RefCell::new(Vec::new()),
                owner: RefCell::new(owner),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Destination nodes. Fixed at creation.
    pub fn destinations(&self) -> &NodeSet {
        &self.inner.destinations
    }

    pub fn includes(&self, node: NodeId) -> bool {
        self.inner.destinations.contains(&node)
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Whether a raw link is currently bound.
    pub fn has_link(&self) -> bool {
        self.inner.slot.borrow().link.is_some()
    }

    /// Number of links bound so far. Each swap increments it.
    pub fn link_generation(&self) -> u64 {
        self.inner.slot.borrow().generation
    }

    /// Whether two handles refer to the same connection.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// Wait until a link is bound.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Closed` if the connection closes first.
    pub async fn wait_active(&self) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ConnectionState::Active => return Ok(()),
                ConnectionState::Closed => return Err(MeshError::Closed(self.id())),
                ConnectionState::Pending | ConnectionState::Reconnecting => {}
            }
            if rx.changed().await.is_err() {
                return Err(MeshError::Closed(self.id()));
            }
        }
    }

    /// Send one framed packet on the bound link.
    ///
    /// An I/O failure unbinds the link and moves the connection to
    /// `Reconnecting`; the identifier stays valid for a later swap.
    ///
    /// # Errors
    ///
    /// Returns `NotActive` without a bound link, `Closed` after close,
    /// `Frame` when the payload is too large or the link fails.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        let (link, generation) = self.current_link()?;
        let mut guard = link.writer.lock().await;
        match write_frame(&mut *guard, payload, self.inner.max_frame_size).await {
            Ok(()) => Ok(()),
            Err(e @ FrameError::TooLarge { .. }) => Err(e.into()),
            Err(e) => {
                drop(guard);
                self.link_lost(generation, &e);
                Err(e.into())
            }
        }
    }

    /// Receive one framed packet from the bound link.
    ///
    /// A receive already waiting on a link keeps reading that link even if a
    /// swap happens meanwhile; the next call uses the new link.
    pub async fn recv(&self) -> Result<Bytes> {
        let (link, generation) = self.current_link()?;
        let mut guard = link.reader.lock().await;
        match read_frame(&mut *guard, self.inner.max_frame_size).await {
            Ok(body) => Ok(body),
            Err(e) => {
                drop(guard);
                self.link_lost(generation, &e);
                Err(e.into())
            }
        }
    }

    /// Ask the local node to open a fresh link for this connection.
    ///
    /// This is the explicit retry path after a failed establishment; the node
    /// never retries on its own.
    pub fn reconnect(&self) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(MeshError::Closed(self.id()));
        }
        if self.direction() == Direction::Incoming {
            return Err(MeshError::NotInitiator(self.id()));
        }
        let owner = self
            .inner
            .owner
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(MeshError::NotRunning)?;
        owner.reconnect_requested(self)
    }

    /// Close the connection and release its identifier. Idempotent.
    pub fn close(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Closed);
        let link = self.inner.slot.borrow_mut().link.take();
        drop(link);

        let peers = std::mem::take(&mut *self.inner.peers.borrow_mut());
        for peer in peers.iter().filter_map(WeakRemotePeer::upgrade) {
            peer.detach_connection(&self.id());
        }

        let owner = self.inner.owner.borrow_mut().take();
        if let Some(owner) = owner.and_then(|w| w.upgrade()) {
            owner.connection_closed(self);
        }
        tracing::debug!(conn = %self.id(), "connection closed");
    }

    /// Claim the next attempt number without touching the state.
    pub(crate) fn claim_attempt(&self) -> u64 {
        let attempt = self.inner.attempts.get() + 1;
        self.inner.attempts.set(attempt);
        attempt
    }

    /// Claim an attempt for an outbound (re)establishment.
    pub(crate) fn begin_attempt(&self) -> u64 {
        if self.state() == ConnectionState::Active {
            self.set_state(ConnectionState::Reconnecting);
        }
        self.claim_attempt()
    }

    /// Offer a handshaken link produced by `attempt`.
    pub(crate) fn bind(&self, link: BoxedLink, attempt: u64) -> BindOutcome {
        if self.state() == ConnectionState::Closed {
            return BindOutcome::Closed;
        }
        let swapped = {
            let mut slot = self.inner.slot.borrow_mut();
            if attempt < slot.bound_attempt {
                return BindOutcome::Superseded;
            }
            let previous = slot.link.replace(BoundLink::new(link));
            slot.generation += 1;
            slot.bound_attempt = attempt;
            previous.is_some()
        };
        self.set_state(ConnectionState::Active);
        BindOutcome::Bound { swapped }
    }

    /// Record that `attempt` failed to produce a link.
    pub(crate) fn attempt_failed(&self, attempt: u64) {
        if self.state() == ConnectionState::Closed || attempt != self.inner.attempts.get() {
            return;
        }
        let next = {
            let slot = self.inner.slot.borrow();
            match (&slot.link, slot.generation) {
                (Some(_), _) => ConnectionState::Active,
                (None, 0) => ConnectionState::Pending,
                (None, _) => ConnectionState::Reconnecting,
            }
        };
        self.set_state(next);
    }

    /// Remember a peer whose map holds this connection.
    pub(crate) fn note_peer(&self, peer: WeakRemotePeer) {
        let mut peers = self.inner.peers.borrow_mut();
        peers.retain(|known| known.upgrade().is_some());
        peers.push(peer);
    }

    fn current_link(&self) -> Result<(SharedLink, u64)> {
        if self.state() == ConnectionState::Closed {
            return Err(MeshError::Closed(self.id()));
        }
        let slot = self.inner.slot.borrow();
        match &slot.link {
            Some(link) => Ok((Rc::clone(link), slot.generation)),
            None => Err(MeshError::NotActive(self.id())),
        }
    }

    fn link_lost(&self, generation: u64, error: &FrameError) {
        {
            let mut slot = self.inner.slot.borrow_mut();
            if slot.generation != generation || slot.link.is_none() {
                return;
            }
            slot.link = None;
        }
        if self.state() != ConnectionState::Closed {
            self.set_state(ConnectionState::Reconnecting);
        }
        tracing::warn!(conn = %self.id(), %error, "raw link lost, waiting for a replacement");
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.inner.state.send_replace(next);
        if previous != next {
            tracing::debug!(conn = %self.id(), ?previous, ?next, "connection state changed");
        }
    }
}

impl fmt::Debug for PacketConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketConnection")
            .field("id", &self.inner.id)
            .field("destinations", &self.inner.destinations)
            .field("direction", &self.inner.direction)
            .field("state", &self.state())
            .field("link_generation", &self.link_generation())
            .finish()
    }
}
