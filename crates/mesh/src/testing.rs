//! In-memory routing collaborators.
//!
//! - [`ScriptedRouter`]: hands out queued establishment outcomes and records
//!   every request; events are injected by the test.
//! - [`MemoryNetwork`]: several local nodes joined by `tokio::io::duplex`
//!   links, with discovery and loss derived from an adjacency set.
//!
//! Both are single-context, like the node they drive.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::{Rc, Weak};

use async_trait::async_trait;
use corelib::{BoxedLink, NodeId, NodeSet, Router, RoutingError, RoutingEventSink, TransportModule};
use tokio::io::DuplexStream;
use tokio::sync::oneshot;

/// Buffer size of in-memory links.
pub const LINK_BUFFER: usize = 64 * 1024;

/// A connected pair: the boxed near end and the raw far end.
pub fn duplex_link() -> (BoxedLink, DuplexStream) {
    let (near, far) = tokio::io::duplex(LINK_BUFFER);
    (Box::new(near), far)
}

/// Yield enough times for spawned local tasks and in-memory I/O to run.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

type Outcome = Result<BoxedLink, RoutingError>;

enum Scripted {
    Ready(Outcome),
    Deferred(oneshot::Receiver<Outcome>),
}

/// Completes a deferred establishment request.
pub struct Deferred {
    tx: oneshot::Sender<Outcome>,
}

impl Deferred {
    /// Resolve with a link. Returns false if the request was abandoned.
    pub fn succeed(self, link: BoxedLink) -> bool {
        self.tx.send(Ok(link)).is_ok()
    }

    pub fn fail(self, error: RoutingError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }

    /// Whether the requesting task is gone.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Default)]
struct ScriptedState {
    running: bool,
    sink: Option<Rc<dyn RoutingEventSink>>,
    outcomes: VecDeque<Scripted>,
    requests: Vec<NodeSet>,
    modules: Vec<Rc<dyn TransportModule>>,
    starts: usize,
    stops: usize,
}

/// Router driven entirely by the test.
///
/// Requests with nothing queued fail with `Unreachable`.
#[derive(Default)]
pub struct ScriptedRouter {
    state: RefCell<ScriptedState>,
}

impl ScriptedRouter {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Queue a successful outcome.
    pub fn push_link(&self, link: BoxedLink) {
        self.state
            .borrow_mut()
            .outcomes
            .push_back(Scripted::Ready(Ok(link)));
    }

    /// Queue a failed outcome.
    pub fn push_failure(&self, error: RoutingError) {
        self.state
            .borrow_mut()
            .outcomes
            .push_back(Scripted::Ready(Err(error)));
    }

    /// Queue an outcome the test resolves later.
    pub fn push_deferred(&self) -> Deferred {
        let (tx, rx) = oneshot::channel();
        self.state
            .borrow_mut()
            .outcomes
            .push_back(Scripted::Deferred(rx));
        Deferred { tx }
    }

    /// Destination sets requested so far, in order.
    pub fn requests(&self) -> Vec<NodeSet> {
        self.state.borrow().requests.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    pub fn starts(&self) -> usize {
        self.state.borrow().starts
    }

    pub fn stops(&self) -> usize {
        self.state.borrow().stops
    }

    pub fn module_names(&self) -> Vec<String> {
        self.state
            .borrow()
            .modules
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    fn sink(&self) -> Option<Rc<dyn RoutingEventSink>> {
        self.state.borrow().sink.clone()
    }

    /// Deliver `node_found`. Returns false when no sink is wired.
    pub fn found(&self, node: NodeId) -> bool {
        self.sink().map(|sink| sink.node_found(node)).is_some()
    }

    pub fn lost(&self, node: NodeId) -> bool {
        self.sink().map(|sink| sink.node_lost(node)).is_some()
    }

    pub fn improved(&self, node: NodeId) -> bool {
        self.sink().map(|sink| sink.route_improved(node)).is_some()
    }

    pub fn incoming(&self, node: NodeId, link: BoxedLink) -> bool {
        self.sink()
            .map(|sink| sink.incoming_connection(node, link))
            .is_some()
    }
}

#[async_trait(?Send)]
impl Router for ScriptedRouter {
    fn start(&self, sink: Rc<dyn RoutingEventSink>) {
        let mut state = self.state.borrow_mut();
        state.running = true;
        state.sink = Some(sink);
        state.starts += 1;
    }

    fn stop(&self) {
        let mut state = self.state.borrow_mut();
        if state.running {
            state.running = false;
            state.sink = None;
            state.stops += 1;
        }
    }

    async fn establish_multicast(&self, destinations: &NodeSet) -> Result<BoxedLink, RoutingError> {
        let next = {
            let mut state = self.state.borrow_mut();
            if !state.running {
                return Err(RoutingError::Stopped);
            }
            state.requests.push(destinations.clone());
            state.outcomes.pop_front()
        };
        match next {
            Some(Scripted::Ready(outcome)) => outcome,
            Some(Scripted::Deferred(rx)) => rx.await.unwrap_or(Err(RoutingError::Stopped)),
            None => Err(RoutingError::Unreachable(destinations.clone())),
        }
    }

    fn add_module(&self, module: Rc<dyn TransportModule>) {
        self.state.borrow_mut().modules.push(module);
    }

    fn remove_module(&self, name: &str) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.modules.len();
        state.modules.retain(|m| m.name() != name);
        state.modules.len() != before
    }
}

#[derive(Default)]
struct NetworkState {
    routers: HashMap<NodeId, Weak<MemoryRouter>>,
    /// Undirected adjacency, stored with the smaller node first.
    edges: BTreeSet<(NodeId, NodeId)>,
}

impl NetworkState {
    fn linked(&self, a: NodeId, b: NodeId) -> bool {
        self.edges.contains(&edge(a, b))
    }

    fn neighbours(&self, node: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter_map(|&(a, b)| match node {
                n if n == a => Some(b),
                n if n == b => Some(a),
                _ => None,
            })
            .collect()
    }

    /// Sink of `node` if its router is started.
    fn sink(&self, node: NodeId) -> Option<Rc<dyn RoutingEventSink>> {
        self.routers
            .get(&node)
            .and_then(Weak::upgrade)
            .and_then(|router| router.sink())
    }
}

fn edge(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// In-memory network joining several routers.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router for `node`, registered with this network.
    pub fn router(&self, node: NodeId) -> Rc<MemoryRouter> {
        let router = Rc::new(MemoryRouter {
            node,
            network: Rc::downgrade(&self.state),
            state: RefCell::new(MemoryRouterState::default()),
        });
        self.state
            .borrow_mut()
            .routers
            .insert(node, Rc::downgrade(&router));
        router
    }

    /// Join `a` and `b`. Started routers on both ends see each other.
    pub fn link(&self, a: NodeId, b: NodeId) {
        let sinks = {
            let mut state = self.state.borrow_mut();
            if !state.edges.insert(edge(a, b)) {
                return;
            }
            (state.sink(a), state.sink(b))
        };
        if let (Some(sink_a), Some(sink_b)) = sinks {
            sink_a.node_found(b);
            sink_b.node_found(a);
        }
    }

    /// Separate `a` and `b`. Started routers on both ends lose each other.
    pub fn unlink(&self, a: NodeId, b: NodeId) {
        let sinks = {
            let mut state = self.state.borrow_mut();
            if !state.edges.remove(&edge(a, b)) {
                return;
            }
            (state.sink(a), state.sink(b))
        };
        if let Some(sink) = sinks.0 {
            sink.node_lost(b);
        }
        if let Some(sink) = sinks.1 {
            sink.node_lost(a);
        }
    }

    pub fn are_linked(&self, a: NodeId, b: NodeId) -> bool {
        self.state.borrow().linked(a, b)
    }

    /// Report a better route from `at` toward `toward`.
    pub fn improve_route(&self, at: NodeId, toward: NodeId) -> bool {
        let sink = self.state.borrow().sink(at);
        sink.map(|sink| sink.route_improved(toward)).is_some()
    }
}

#[derive(Default)]
struct MemoryRouterState {
    running: bool,
    sink: Option<Rc<dyn RoutingEventSink>>,
    modules: Vec<Rc<dyn TransportModule>>,
}

/// One node's view of a [`MemoryNetwork`]. Only unicast links are supported.
pub struct MemoryRouter {
    node: NodeId,
    network: Weak<RefCell<NetworkState>>,
    state: RefCell<MemoryRouterState>,
}

impl MemoryRouter {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    pub fn module_names(&self) -> Vec<String> {
        self.state
            .borrow()
            .modules
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    fn sink(&self) -> Option<Rc<dyn RoutingEventSink>> {
        let state = self.state.borrow();
        if state.running {
            state.sink.clone()
        } else {
            None
        }
    }

    /// Started neighbours and their sinks.
    fn live_neighbours(&self) -> Vec<(NodeId, Rc<dyn RoutingEventSink>)> {
        let Some(network) = self.network.upgrade() else {
            return Vec::new();
        };
        let network = network.borrow();
        network
            .neighbours(self.node)
            .into_iter()
            .filter_map(|node| network.sink(node).map(|sink| (node, sink)))
            .collect()
    }
}

#[async_trait(?Send)]
impl Router for MemoryRouter {
    fn start(&self, sink: Rc<dyn RoutingEventSink>) {
        {
            let mut state = self.state.borrow_mut();
            if state.running {
                return;
            }
            state.running = true;
            state.sink = Some(Rc::clone(&sink));
        }
        for (neighbour, remote) in self.live_neighbours() {
            sink.node_found(neighbour);
            remote.node_found(self.node);
        }
    }

    fn stop(&self) {
        {
            let mut state = self.state.borrow_mut();
            if !state.running {
                return;
            }
            state.running = false;
            state.sink = None;
        }
        for (_, remote) in self.live_neighbours() {
            remote.node_lost(self.node);
        }
    }

    async fn establish_multicast(&self, destinations: &NodeSet) -> Result<BoxedLink, RoutingError> {
        if !self.is_running() {
            return Err(RoutingError::Stopped);
        }
        let target = match destinations.iter().collect::<Vec<_>>().as_slice() {
            [target] => **target,
            _ => {
                return Err(RoutingError::Rejected(format!(
                    "memory network links one destination, got {}",
                    destinations.len()
                )))
            }
        };
        let remote = self.network.upgrade().and_then(|network| {
            let network = network.borrow();
            if network.linked(self.node, target) {
                network.sink(target)
            } else {
                None
            }
        });
        let Some(remote) = remote else {
            return Err(RoutingError::Unreachable(destinations.clone()));
        };

        let (near, far) = tokio::io::duplex(LINK_BUFFER);
        remote.incoming_connection(self.node, Box::new(far));
        Ok(Box::new(near))
    }

    fn add_module(&self, module: Rc<dyn TransportModule>) {
        self.state.borrow_mut().modules.push(module);
    }

    fn remove_module(&self, name: &str) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.modules.len();
        state.modules.retain(|m| m.name() != name);
        state.modules.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(RefCell<Vec<String>>);

    impl RoutingEventSink for Recorder {
        fn node_found(&self, node: NodeId) {
            self.0.borrow_mut().push(format!("found {:x}", node.0));
        }
        fn node_lost(&self, node: NodeId) {
            self.0.borrow_mut().push(format!("lost {:x}", node.0));
        }
        fn route_improved(&self, node: NodeId) {
            self.0.borrow_mut().push(format!("improved {:x}", node.0));
        }
        fn incoming_connection(&self, node: NodeId, _link: BoxedLink) {
            self.0.borrow_mut().push(format!("incoming {:x}", node.0));
        }
    }

    fn recorder() -> Rc<Recorder> {
        Rc::new(Recorder(RefCell::new(Vec::new())))
    }

    fn set(nodes: &[u128]) -> NodeSet {
        nodes.iter().copied().map(NodeId).collect()
    }

    #[tokio::test]
    async fn test_scripted_router_pops_in_order() {
        let router = ScriptedRouter::new();
        router.start(recorder());
        router.push_failure(RoutingError::Rejected("busy".into()));
        router.push_link(duplex_link().0);

        assert!(router.establish_multicast(&set(&[1])).await.is_err());
        assert!(router.establish_multicast(&set(&[1])).await.is_ok());
        assert!(matches!(
            router.establish_multicast(&set(&[2])).await,
            Err(RoutingError::Unreachable(_))
        ));
        assert_eq!(router.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_router_stopped() {
        let router = ScriptedRouter::new();
        assert!(matches!(
            router.establish_multicast(&set(&[1])).await,
            Err(RoutingError::Stopped)
        ));
        assert!(router.requests().is_empty());
    }

    #[test]
    fn test_memory_network_discovery_both_ways() {
        let network = MemoryNetwork::new();
        let a = network.router(NodeId(1));
        let b = network.router(NodeId(2));
        let (sink_a, sink_b) = (recorder(), recorder());
        network.link(NodeId(1), NodeId(2));

        a.start(sink_a.clone());
        assert!(sink_a.0.borrow().is_empty(), "neighbour not started yet");
        b.start(sink_b.clone());
        assert_eq!(*sink_a.0.borrow(), vec!["found 2"]);
        assert_eq!(*sink_b.0.borrow(), vec!["found 1"]);

        network.unlink(NodeId(1), NodeId(2));
        assert_eq!(sink_a.0.borrow().last().map(String::as_str), Some("lost 2"));
        assert_eq!(sink_b.0.borrow().last().map(String::as_str), Some("lost 1"));
    }

    #[tokio::test]
    async fn test_memory_network_rejects_multicast() {
        let network = MemoryNetwork::new();
        let a = network.router(NodeId(1));
        a.start(recorder());
        let err = a.establish_multicast(&set(&[2, 3])).await.unwrap_err();
        assert!(matches!(err, RoutingError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_memory_network_delivers_far_end() {
        let network = MemoryNetwork::new();
        let a = network.router(NodeId(1));
        let b = network.router(NodeId(2));
        let sink_b = recorder();
        network.link(NodeId(1), NodeId(2));
        a.start(recorder());
        b.start(sink_b.clone());

        a.establish_multicast(&set(&[2])).await.unwrap();
        assert_eq!(sink_b.0.borrow().last().map(String::as_str), Some("incoming 1"));

        network.unlink(NodeId(1), NodeId(2));
        assert!(matches!(
            a.establish_multicast(&set(&[2])).await,
            Err(RoutingError::Unreachable(_))
        ));
    }
}
