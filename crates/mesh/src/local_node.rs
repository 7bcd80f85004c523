//! The local node.
//!
//! [`LocalNode`] is the application's entry point. It owns the peer registry,
//! the connection registry and the callbacks, wires itself into the routing
//! layer on `start`, and exposes `connect` for outbound logical connections.
//!
//! # Serialization context
//!
//! A node and everything it hands out are `!Send`. All calls, routing events
//! and I/O completions run on one thread, inside a `tokio::task::LocalSet`.
//! The state lives in a `RefCell` that is never borrowed across an `.await`
//! or while application callbacks run, so callbacks may call back into the
//! node freely.
//!
//! Several nodes may share one context; they do not share state.
//!
//! # Example
//!
//! ```ignore
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let node = LocalNode::new(router, MeshConfig::default())?;
//!     node.start(PeerCallbacks::new(
//!         |peer: &RemotePeer| println!("found {}", peer.node()),
//!         |peer: &RemotePeer| println!("lost {}", peer.node()),
//!     ))?;
//!     let conn = node.connect(&[peer])?;
//!     conn.wait_active().await?;
//!     conn.send(b"hello").await?;
//! }).await;
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use corelib::{ConnectionId, NodeId, Router, RoutingEventSink, TransportModule};

use crate::config::MeshConfig;
use crate::connection::PacketConnection;
use crate::error::{MeshError, Result};
use crate::events::NodeEvents;
use crate::manager::ConnectionManager;
use crate::peer::{ConnectionHandler, RemotePeer};
use crate::peer_registry::PeerRegistry;

/// Discovery and removal notifications.
pub trait PeerListener {
    /// A node was seen for the first time since it became reachable.
    fn peer_discovered(&self, peer: &RemotePeer);

    /// A node was reported lost; `peer` is already detached.
    fn peer_removed(&self, peer: &RemotePeer);
}

/// [`PeerListener`] built from two closures.
pub struct PeerCallbacks<D, R> {
    on_discovered: D,
    on_removed: R,
}

impl<D, R> PeerCallbacks<D, R>
where
    D: Fn(&RemotePeer),
    R: Fn(&RemotePeer),
{
    pub fn new(on_discovered: D, on_removed: R) -> Self {
        Self {
            on_discovered,
            on_removed,
        }
    }
}

impl<D, R> PeerListener for PeerCallbacks<D, R>
where
    D: Fn(&RemotePeer),
    R: Fn(&RemotePeer),
{
    fn peer_discovered(&self, peer: &RemotePeer) {
        (self.on_discovered)(peer)
    }

    fn peer_removed(&self, peer: &RemotePeer) {
        (self.on_removed)(peer)
    }
}

/// Mutable node state. Only touched from the serialization context.
pub(crate) struct NodeState {
    pub(crate) running: bool,
    pub(crate) listener: Option<Rc<dyn PeerListener>>,
    pub(crate) global_handler: Option<Rc<dyn ConnectionHandler>>,
    pub(crate) peers: PeerRegistry,
    pub(crate) manager: ConnectionManager,
}

pub(crate) struct NodeCore {
    pub(crate) config: MeshConfig,
    pub(crate) router: Rc<dyn Router>,
    pub(crate) state: RefCell<NodeState>,
}

impl NodeCore {
    pub(crate) fn is_running(&self) -> bool {
        self.state.borrow().running
    }
}

/// Handle to a local node. Clones share the same node.
#[derive(Clone)]
pub struct LocalNode {
    core: Rc<NodeCore>,
}

impl LocalNode {
    /// Create a stopped node on top of `router`.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Config` if the configuration is invalid.
    pub fn new(router: Rc<dyn Router>, config: MeshConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(router, config))
    }

    /// Create a stopped node with the default configuration.
    pub fn with_defaults(router: Rc<dyn Router>) -> Self {
        Self::build(router, MeshConfig::default())
    }

    fn build(router: Rc<dyn Router>, config: MeshConfig) -> Self {
        Self {
            core: Rc::new(NodeCore {
                config,
                router,
                state: RefCell::new(NodeState {
                    running: false,
                    listener: None,
                    global_handler: None,
                    peers: PeerRegistry::new(),
                    manager: ConnectionManager::new(),
                }),
            }),
        }
    }

    /// Start routing and report peers to `listener`.
    ///
    /// Incoming connections are dispatched to per-peer handlers only until
    /// a global handler is set.
    pub fn start(&self, listener: impl PeerListener + 'static) -> Result<()> {
        self.start_inner(Rc::new(listener), None)
    }

    /// Start with a global incoming-connection handler, the fallback for
    /// peers that have no handler of their own.
    pub fn start_with_handler(
        &self,
        listener: impl PeerListener + 'static,
        on_connection: impl ConnectionHandler + 'static,
    ) -> Result<()> {
        self.start_inner(Rc::new(listener), Some(Rc::new(on_connection)))
    }

    fn start_inner(
        &self,
        listener: Rc<dyn PeerListener>,
        on_connection: Option<Rc<dyn ConnectionHandler>>,
    ) -> Result<()> {
        {
            let mut state = self.core.state.borrow_mut();
            if state.running {
                return Err(MeshError::AlreadyRunning);
            }
            state.running = true;
            state.listener = Some(listener);
            state.global_handler = on_connection;
        }
        self.core.router.start(self.event_sink());
        tracing::info!("local node started");
        Ok(())
    }

    /// Stop the node. Idempotent.
    ///
    /// Clears the discovery, removal and global connection callbacks, aborts
    /// in-flight establishment and handshake tasks, and stops the router.
    /// Existing connections and their bound links are left alone. Known
    /// peers stay registered but are announced again after the next `start`.
    pub fn stop(&self) {
        let aborted = {
            let mut state = self.core.state.borrow_mut();
            if !state.running {
                return;
            }
            state.running = false;
            state.listener = None;
            state.global_handler = None;
            state.peers.reset_announcements();
            state.manager.abort_all()
        };
        self.core.router.stop();
        tracing::info!(aborted, "local node stopped");
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    pub fn config(&self) -> &MeshConfig {
        &self.core.config
    }

    /// Set or replace the global incoming-connection handler.
    pub fn set_connection_handler(&self, handler: impl ConnectionHandler + 'static) {
        self.core.state.borrow_mut().global_handler = Some(Rc::new(handler));
    }

    pub fn clear_connection_handler(&self) {
        self.core.state.borrow_mut().global_handler = None;
    }

    /// Event sink feeding this node. `start` hands one to the router; routers
    /// wired some other way can take their own.
    pub fn event_sink(&self) -> Rc<dyn RoutingEventSink> {
        Rc::new(NodeEvents::new(Rc::downgrade(&self.core)))
    }

    /// Pass a transport module through to the router.
    pub fn add_module(&self, module: Rc<dyn TransportModule>) {
        self.core.router.add_module(module);
    }

    pub fn remove_module(&self, name: &str) -> bool {
        self.core.router.remove_module(name)
    }

    /// Open a logical connection to `destinations`.
    ///
    /// Returns a `Pending` connection immediately; a raw link is requested in
    /// the background and bound once its handshake is written. Failures are
    /// logged and leave the connection `Pending` until
    /// [`PacketConnection::reconnect`] or a route improvement.
    ///
    /// # Errors
    ///
    /// Returns `NoDestinations` for an empty slice and `NotRunning` before
    /// `start`.
    pub fn connect(&self, destinations: &[RemotePeer]) -> Result<PacketConnection> {
        self.core.connect(destinations)
    }

    /// Request a fresh raw link for a connection this node established.
    pub fn reconnect(&self, id: &ConnectionId) -> Result<()> {
        let connection = self
            .connection(id)
            .ok_or(MeshError::UnknownConnection(*id))?;
        connection.reconnect()
    }

    /// Currently registered peer for `node`.
    pub fn peer(&self, node: NodeId) -> Option<RemotePeer> {
        self.core.state.borrow().peers.get(node)
    }

    /// All registered peers, ordered by node.
    pub fn peers(&self) -> Vec<RemotePeer> {
        self.core.state.borrow().peers.peers()
    }

    /// Live connection for `id`, established or incoming.
    pub fn connection(&self, id: &ConnectionId) -> Option<PacketConnection> {
        self.core.state.borrow().manager.registry().get(id).cloned()
    }

    /// Number of live connections, established and incoming.
    pub fn connection_count(&self) -> usize {
        self.core.state.borrow().manager.registry().len()
    }

    /// Number of establishment and handshake tasks still running.
    pub fn in_flight(&self) -> usize {
        self.core.state.borrow().manager.in_flight()
    }
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.core.state.borrow();
        f.debug_struct("LocalNode")
            .field("running", &state.running)
            .field("peers", &state.peers.len())
            .field("connections", &state.manager.registry().len())
            .finish()
    }
}
