//! Connection manager.
//!
//! The control logic of the local node:
//!
//! - **Outbound create**: register a `Pending` connection, ask the router for
//!   a raw link toward its destinations, write the handshake, bind.
//! - **Inbound accept**: read the handshake, resolve the identifier against
//!   the originating peer (then the registry), swap into an existing
//!   connection or create a new one and dispatch it.
//! - **Route improvement**: request a fresh link for every established
//!   connection reaching the improved node, keeping identifier and
//!   destinations.
//!
//! Network I/O runs in `spawn_local` tasks. Each task re-enters the node
//! through a weak reference when it completes and is tracked so `stop` can
//! abort it.

use std::collections::HashMap;
use std::future::Future;
use std::rc::{Rc, Weak};

use corelib::node::display_nodes;
use corelib::{
    read_handshake, write_handshake, BoxedLink, ConnectionId, HandshakeError, NodeId, NodeSet,
    Router,
};
use tokio::task::AbortHandle;

use crate::config::RouteRefresh;
use crate::connection::{BindOutcome, ConnectionOwner, Direction, PacketConnection};
use crate::connection_registry::ConnectionRegistry;
use crate::error::{MeshError, Result};
use crate::local_node::{NodeCore, NodeState};
use crate::peer::{ConnectionHandler, RemotePeer};
use crate::telemetry;

/// A tracked task. Establishment tasks remember their attempt so an abort
/// can settle the connection state.
struct InFlight {
    handle: AbortHandle,
    attempt: Option<(PacketConnection, u64)>,
}

/// Registry plus bookkeeping of in-flight I/O tasks.
#[derive(Default)]
pub(crate) struct ConnectionManager {
    registry: ConnectionRegistry,
    in_flight: HashMap<u64, InFlight>,
    next_op: u64,
}

impl ConnectionManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Draw an identifier no live connection uses.
    fn fresh_id(&self) -> ConnectionId {
        loop {
            let id = ConnectionId::random();
            if !self.registry.contains(&id) {
                return id;
            }
        }
    }

    fn next_op(&mut self) -> u64 {
        self.next_op += 1;
        self.next_op
    }

    fn track(&mut self, op: u64, handle: AbortHandle, attempt: Option<(PacketConnection, u64)>) {
        self.in_flight.insert(op, InFlight { handle, attempt });
    }

    fn finish(&mut self, op: u64) {
        self.in_flight.remove(&op);
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Abort every tracked task. Returns how many were still running.
    ///
    /// An aborted establishment counts as a failed attempt, so a connection
    /// that still holds its previous link returns to `Active`.
    pub(crate) fn abort_all(&mut self) -> usize {
        let count = self.in_flight.len();
        for (_, task) in self.in_flight.drain() {
            task.handle.abort();
            if let Some((connection, attempt)) = task.attempt {
                connection.attempt_failed(attempt);
            }
        }
        count
    }
}

/// How an inbound identifier resolved.
enum Resolution {
    /// Known connection; the new link replaces the old one.
    Swap(PacketConnection),
    /// Unknown identifier; a new incoming connection was registered.
    FirstContact {
        connection: PacketConnection,
        peer: RemotePeer,
    },
    /// Identifier is live but does not include the sending node.
    Conflict,
}

/// Open a raw link toward the connection's destinations and identify it.
async fn open_link(router: &dyn Router, connection: &PacketConnection) -> corelib::Result<BoxedLink> {
    let mut link = router
        .establish_multicast(connection.destinations())
        .await?;
    write_handshake(&mut link, &connection.id()).await?;
    Ok(link)
}

fn failure_stage(error: &corelib::Error) -> &'static str {
    match error {
        corelib::Error::Routing(_) => "routing",
        corelib::Error::Handshake(_) | corelib::Error::Frame(_) => "handshake",
    }
}

impl NodeCore {
    fn owner(self: &Rc<Self>) -> Weak<dyn ConnectionOwner> {
        let weak: Weak<NodeCore> = Rc::downgrade(self);
        weak
    }

    /// Run `task` on the serialization context, tracked until it finishes.
    fn spawn_tracked<F>(self: &Rc<Self>, attempt: Option<(PacketConnection, u64)>, task: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let op = self.state.borrow_mut().manager.next_op();
        let weak = Rc::downgrade(self);
        let handle = tokio::task::spawn_local(async move {
            task.await;
            if let Some(core) = weak.upgrade() {
                core.state.borrow_mut().manager.finish(op);
            }
        });
        self.state
            .borrow_mut()
            .manager
            .track(op, handle.abort_handle(), attempt);
    }

    pub(crate) fn connect(self: &Rc<Self>, peers: &[RemotePeer]) -> Result<PacketConnection> {
        if peers.is_empty() {
            return Err(MeshError::NoDestinations);
        }
        let destinations: NodeSet = peers.iter().map(RemotePeer::node).collect();

        let connection = {
            let mut state = self.state.borrow_mut();
            if !state.running {
                return Err(MeshError::NotRunning);
            }
            let id = state.manager.fresh_id();
            let connection = PacketConnection::new(
                id,
                destinations,
                Direction::Established,
                self.config.max_frame_size,
                Some(self.owner()),
            );
            state.manager.registry.insert(connection.clone())?;
            connection
        };
        for peer in peers {
            peer.attach(&connection);
        }

        telemetry::connection_created(Direction::Established);
        tracing::info!(
            conn = %connection.id(),
            destinations = %display_nodes(connection.destinations()),
            "connection created"
        );
        self.establish(&connection);
        Ok(connection)
    }

    /// Request a raw link for `connection`, same identifier and destinations.
    pub(crate) fn establish(self: &Rc<Self>, connection: &PacketConnection) {
        let attempt = connection.begin_attempt();
        tracing::debug!(conn = %connection.id(), attempt, "requesting raw link");

        let router = Rc::clone(&self.router);
        let tracked = Some((connection.clone(), attempt));
        let connection = connection.clone();
        let weak = Rc::downgrade(self);
        self.spawn_tracked(tracked, async move {
            let result = open_link(router.as_ref(), &connection).await;
            if let Some(core) = weak.upgrade() {
                core.finish_establish(&connection, attempt, result);
            }
        });
    }

    fn finish_establish(
        &self,
        connection: &PacketConnection,
        attempt: u64,
        result: corelib::Result<BoxedLink>,
    ) {
        if !self.is_running() {
            tracing::debug!(conn = %connection.id(), "node stopped, discarding establishment outcome");
            connection.attempt_failed(attempt);
            return;
        }
        match result {
            Ok(link) => match connection.bind(link, attempt) {
                BindOutcome::Bound { swapped: true } => {
                    telemetry::link_swapped();
                    tracing::info!(
                        conn = %connection.id(),
                        generation = connection.link_generation(),
                        "raw link swapped"
                    );
                }
                BindOutcome::Bound { swapped: false } => {
                    tracing::info!(conn = %connection.id(), "connection active");
                }
                BindOutcome::Superseded => {
                    tracing::debug!(conn = %connection.id(), attempt, "newer link already bound, dropping");
                }
                BindOutcome::Closed => {
                    tracing::debug!(conn = %connection.id(), "connection closed before its link was ready");
                }
            },
            Err(error) => {
                telemetry::establish_failed(failure_stage(&error));
                tracing::warn!(conn = %connection.id(), attempt, %error, "establishment attempt abandoned");
                connection.attempt_failed(attempt);
            }
        }
    }

    pub(crate) fn on_route_improved(self: &Rc<Self>, node: NodeId) {
        let targets: Vec<PacketConnection> = {
            let state = self.state.borrow();
            if !state.running {
                return;
            }
            state
                .manager
                .registry
                .established_toward(node)
                .into_iter()
                .filter(|conn| match self.config.route_refresh {
                    RouteRefresh::Always => true,
                    RouteRefresh::WhenUnbound => !conn.has_link(),
                })
                .collect()
        };
        tracing::debug!(%node, count = targets.len(), "route improved");
        for connection in &targets {
            self.establish(connection);
        }
    }

    pub(crate) fn on_incoming_connection(self: &Rc<Self>, node: NodeId, mut link: BoxedLink) {
        if !self.is_running() {
            tracing::debug!(%node, "node stopped, dropping incoming raw link");
            return;
        }
        let timeout = self.config.handshake_timeout();
        let weak = Rc::downgrade(self);
        self.spawn_tracked(None, async move {
            let result = read_handshake(&mut link, timeout).await;
            if let Some(core) = weak.upgrade() {
                core.resolve_incoming(node, link, result);
            }
        });
    }

    fn resolve_incoming(
        self: &Rc<Self>,
        node: NodeId,
        link: BoxedLink,
        result: std::result::Result<ConnectionId, HandshakeError>,
    ) {
        let id = match result {
            Ok(id) => id,
            Err(error) => {
                telemetry::handshake_failed();
                tracing::warn!(%node, %error, "dropping raw link, handshake read failed");
                return;
            }
        };

        let (resolution, announced, listener, global) = {
            let mut state = self.state.borrow_mut();
            if !state.running {
                tracing::debug!(%node, conn = %id, "node stopped, dropping identified raw link");
                return;
            }
            let peer = state.peers.provide(node);
            let announced = peer.mark_announced().then(|| peer.clone());
            let resolution = self.resolve(&mut state, &peer, node, id);
            (
                resolution,
                announced,
                state.listener.clone(),
                state.global_handler.clone(),
            )
        };

        if let Some(peer) = &announced {
            telemetry::peer_discovered();
            tracing::info!(%node, "peer discovered through handshake");
            if let Some(listener) = &listener {
                listener.peer_discovered(peer);
            }
        }

        match resolution {
            Resolution::Swap(connection) => self.reattach(&connection, link),
            Resolution::FirstContact { connection, peer } => {
                let attempt = connection.claim_attempt();
                connection.bind(link, attempt);
                tracing::info!(conn = %id, %node, "incoming connection accepted");
                self.dispatch(connection, &peer, global);
            }
            Resolution::Conflict => {
                tracing::warn!(conn = %id, %node, "identifier belongs to a connection without this node, dropping raw link");
            }
        }
    }

    /// Resolve `id` for a link opened by `node`. Peer map first, then the
    /// registry for connections that outlived an earlier peer object.
    fn resolve(
        self: &Rc<Self>,
        state: &mut NodeState,
        peer: &RemotePeer,
        node: NodeId,
        id: ConnectionId,
    ) -> Resolution {
        if let Some(connection) = peer.connection(&id) {
            return Resolution::Swap(connection);
        }
        if let Some(connection) = state.manager.registry.get(&id).cloned() {
            if !connection.includes(node) {
                return Resolution::Conflict;
            }
            peer.attach(&connection);
            return Resolution::Swap(connection);
        }

        let connection = PacketConnection::new(
            id,
            [node].into_iter().collect(),
            Direction::Incoming,
            self.config.max_frame_size,
            Some(self.owner()),
        );
        if state.manager.registry.insert(connection.clone()).is_err() {
            return Resolution::Conflict;
        }
        peer.attach(&connection);
        telemetry::connection_created(Direction::Incoming);
        Resolution::FirstContact {
            connection,
            peer: peer.clone(),
        }
    }

    fn reattach(&self, connection: &PacketConnection, link: BoxedLink) {
        let attempt = connection.claim_attempt();
        match connection.bind(link, attempt) {
            BindOutcome::Bound { swapped } => {
                if swapped {
                    telemetry::link_swapped();
                }
                tracing::info!(
                    conn = %connection.id(),
                    generation = connection.link_generation(),
                    "inbound link reattached"
                );
            }
            BindOutcome::Superseded | BindOutcome::Closed => {
                tracing::debug!(conn = %connection.id(), "connection closed, dropping reattached link");
            }
        }
    }

    /// Hand a first-contact connection to the peer's handler, else the
    /// node's global handler.
    fn dispatch(
        &self,
        connection: PacketConnection,
        peer: &RemotePeer,
        global: Option<Rc<dyn ConnectionHandler>>,
    ) {
        match peer.connection_handler().or(global) {
            Some(handler) => handler.on_connection(connection),
            None => {
                telemetry::unhandled_connection();
                tracing::warn!(
                    conn = %connection.id(),
                    node = %peer.node(),
                    "no connection handler registered, incoming connection left unconsumed"
                );
            }
        }
    }
}

impl ConnectionOwner for NodeCore {
    fn connection_closed(&self, connection: &PacketConnection) {
        if self
            .state
            .borrow_mut()
            .manager
            .registry
            .remove(&connection.id())
            .is_some()
        {
            tracing::debug!(conn = %connection.id(), "identifier released");
        }
    }

    fn reconnect_requested(self: Rc<Self>, connection: &PacketConnection) -> Result<()> {
        {
            let state = self.state.borrow();
            if !state.running {
                return Err(MeshError::NotRunning);
            }
            if !state.manager.registry.contains(&connection.id()) {
                return Err(MeshError::UnknownConnection(connection.id()));
            }
        }
        self.establish(connection);
        Ok(())
    }
}
