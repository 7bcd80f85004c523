//! Two local nodes talking over an in-memory network.
//!
//! # Test Strategy
//!
//! 1. **Discovery**: linking and starting nodes announces both ends
//! 2. **Round trip**: connect, dispatch, exchange packets
//! 3. **Swap**: a route improvement moves both ends to a new link while the
//!    handles stay the same

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use corelib::NodeId;
use mesh::testing::{settle, MemoryNetwork};
use mesh::{LocalNode, PacketConnection, PeerCallbacks, RemotePeer};

const A: NodeId = NodeId(0xa);
const B: NodeId = NodeId(0xb);

async fn run_local<F: Future<Output = ()>>(test: F) {
    tokio::task::LocalSet::new().run_until(test).await;
}

struct Pair {
    network: MemoryNetwork,
    a: LocalNode,
    b: LocalNode,
    /// Connections B accepted.
    accepted: Rc<RefCell<Vec<PacketConnection>>>,
    /// Nodes A lost.
    a_lost: Rc<RefCell<Vec<NodeId>>>,
}

fn pair() -> Pair {
    let network = MemoryNetwork::new();
    let a = LocalNode::with_defaults(network.router(A));
    let b = LocalNode::with_defaults(network.router(B));
    network.link(A, B);

    let a_lost: Rc<RefCell<Vec<NodeId>>> = Rc::default();
    let lost = Rc::clone(&a_lost);
    a.start(PeerCallbacks::new(
        |_: &RemotePeer| {},
        move |peer: &RemotePeer| lost.borrow_mut().push(peer.node()),
    ))
    .unwrap();

    let accepted: Rc<RefCell<Vec<PacketConnection>>> = Rc::default();
    let inbox = Rc::clone(&accepted);
    b.start_with_handler(
        PeerCallbacks::new(|_: &RemotePeer| {}, |_: &RemotePeer| {}),
        move |conn: PacketConnection| inbox.borrow_mut().push(conn),
    )
    .unwrap();

    Pair {
        network,
        a,
        b,
        accepted,
        a_lost,
    }
}

#[tokio::test]
async fn test_start_discovers_both_ends() {
    run_local(async {
        let pair = pair();
        assert!(pair.a.peer(B).is_some());
        assert!(pair.b.peer(A).is_some());
    })
    .await;
}

#[tokio::test]
async fn test_round_trip_over_memory_link() {
    run_local(async {
        let pair = pair();
        let to_b = pair.a.connect(&[pair.a.peer(B).unwrap()]).unwrap();
        to_b.wait_active().await.unwrap();
        settle().await;

        let accepted = pair.accepted.borrow().clone();
        assert_eq!(accepted.len(), 1);
        let at_b = &accepted[0];
        assert_eq!(at_b.id(), to_b.id());
        assert!(at_b.includes(A));

        to_b.send(b"ping").await.unwrap();
        assert_eq!(&at_b.recv().await.unwrap()[..], b"ping");
        at_b.send(b"pong").await.unwrap();
        assert_eq!(&to_b.recv().await.unwrap()[..], b"pong");
    })
    .await;
}

#[tokio::test]
async fn test_route_improvement_swaps_both_ends() {
    run_local(async {
        let pair = pair();
        let to_b = pair.a.connect(&[pair.a.peer(B).unwrap()]).unwrap();
        settle().await;
        let at_b = pair.accepted.borrow()[0].clone();

        assert!(pair.network.improve_route(A, B));
        settle().await;

        assert_eq!(to_b.link_generation(), 2);
        assert_eq!(at_b.link_generation(), 2);
        assert_eq!(pair.accepted.borrow().len(), 1, "swap is not a new dispatch");
        assert_eq!(pair.b.connection_count(), 1);

        to_b.send(b"after swap").await.unwrap();
        assert_eq!(&at_b.recv().await.unwrap()[..], b"after swap");
    })
    .await;
}

#[tokio::test]
async fn test_unlink_reports_loss() {
    run_local(async {
        let pair = pair();
        pair.network.unlink(A, B);
        assert_eq!(*pair.a_lost.borrow(), vec![B]);
        assert!(pair.a.peer(B).is_none());
        assert!(pair.b.peer(A).is_none());
    })
    .await;
}

#[tokio::test]
async fn test_stop_is_seen_as_loss_by_the_other_end() {
    run_local(async {
        let pair = pair();
        pair.b.stop();
        assert_eq!(*pair.a_lost.borrow(), vec![B]);

        let err = pair.a.connect(&[]).unwrap_err();
        assert!(matches!(err, mesh::MeshError::NoDestinations));
    })
    .await;
}
