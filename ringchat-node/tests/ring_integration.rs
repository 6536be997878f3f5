//! End-to-end scenarios driving several in-process peers over real localhost
//! TCP sockets. Timeouts are shrunk via `fast_config` so convergence can be
//! polled in well under a second instead of waiting out the production
//! defaults.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use ringchat_core::{Relation, RingConfig};
use ringchat_node::{ControlSurface, EventSink, NetworkState, RecordingSink};

fn fast_config() -> RingConfig {
    let mut cfg = RingConfig::default();
    cfg.ring_repair_timeout_seconds = 0;
    cfg.send_message_timeout_seconds = 3;
    cfg.leader_election_minimum_wait_seconds = 0;
    cfg.leader_election_maximum_wait_seconds = 1;
    cfg.connection_timeout_seconds = 2;
    cfg.connection_timeout_grace_seconds = 1;
    cfg
}

fn node(port: u16) -> (ControlSurface, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let control = ControlSurface::new(
        Ipv4Addr::new(127, 0, 0, 1),
        port,
        fast_config(),
        sink.clone() as Arc<dyn EventSink>,
    );
    (control, sink)
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::new(127, 0, 0, 1), port))
}

/// Polls `condition` every 10ms until it returns true or `timeout` elapses.
async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Walks the `next` chain starting at `start` for `hops` steps, resolving
/// each id against `by_id`, and returns the sequence of ids visited
/// (excluding the starting id, including the final one).
fn walk_next(by_id: &std::collections::HashMap<ringchat_core::NodeId, &ControlSurface>, start: ringchat_core::NodeId, hops: usize) -> Vec<ringchat_core::NodeId> {
    let mut cur = start;
    let mut visited = Vec::new();
    for _ in 0..hops {
        let ctrl = by_id.get(&cur).expect("unknown node id while walking ring");
        let next_peer = ctrl
            .context()
            .registry
            .by_relation(Relation::Next)
            .expect("node has no next while walking ring");
        cur = next_peer.id();
        visited.push(cur);
    }
    visited
}

// Two-node join. A starts alone (single-node leader), B joins. Both should
// end up in a two-node ring where each is simultaneously the other's next
// and prev, and both agree A is the leader.
#[tokio::test]
async fn two_node_join_forms_a_ring() {
    let (a, _a_sink) = node(19101);
    let (b, _b_sink) = node(19102);

    a.start_network(19101).await;
    assert_eq!(a.network_state(), NetworkState::SingleNode);
    assert_eq!(a.leader_id(), a.node_id());

    b.join_network(loopback(19101), 19102).await;

    let converged = wait_until(
        || a.network_state() == NetworkState::Ring && b.network_state() == NetworkState::Ring,
        Duration::from_secs(3),
    )
    .await;
    assert!(converged, "ring never formed between A and B");

    assert_eq!(a.leader_id(), a.node_id());
    assert_eq!(b.leader_id(), a.node_id());

    let a_ctx = a.context();
    let b_ctx = b.context();
    assert_eq!(a_ctx.registry.by_relation(Relation::Next).unwrap().id(), b.node_id());
    assert_eq!(a_ctx.registry.by_relation(Relation::Prev).unwrap().id(), b.node_id());
    assert_eq!(b_ctx.registry.by_relation(Relation::Next).unwrap().id(), a.node_id());
    assert_eq!(b_ctx.registry.by_relation(Relation::Prev).unwrap().id(), a.node_id());

    a.disconnect().await;
    b.disconnect().await;
}

// Three-node chain. A starts, B and C both bootstrap through A. The
// insertion point is always A's successor slot, so the exact order is not
// asserted, only that the three form one closed 3-cycle.
#[tokio::test]
async fn three_node_join_forms_one_closed_ring() {
    let (a, _) = node(19111);
    let (b, _) = node(19112);
    let (c, _) = node(19113);

    a.start_network(19111).await;
    b.join_network(loopback(19111), 19112).await;
    c.join_network(loopback(19111), 19113).await;

    let converged = wait_until(
        || {
            [&a, &b, &c].iter().all(|ctrl| {
                ctrl.network_state() == NetworkState::Ring
                    && ctrl.context().registry.by_relation(Relation::Next).is_some()
                    && ctrl.context().registry.by_relation(Relation::Prev).is_some()
            })
        },
        Duration::from_secs(3),
    )
    .await;
    assert!(converged, "three-node ring never converged");

    let mut by_id = std::collections::HashMap::new();
    by_id.insert(a.node_id(), &a);
    by_id.insert(b.node_id(), &b);
    by_id.insert(c.node_id(), &c);

    let visited = walk_next(&by_id, a.node_id(), 3);
    assert_eq!(visited.last().copied(), Some(a.node_id()), "chain did not close back to A");
    let distinct: std::collections::HashSet<_> = visited[..2].iter().copied().collect();
    assert_eq!(distinct.len(), 2, "ring did not touch both B and C exactly once");
    assert!(distinct.contains(&b.node_id()));
    assert!(distinct.contains(&c.node_id()));

    for ctrl in [&a, &b, &c] {
        assert_eq!(ctrl.leader_id(), a.node_id());
    }

    a.disconnect().await;
    b.disconnect().await;
    c.disconnect().await;
}

// Leader loss. A three-node ring with leader A; A is torn down the same way
// a crash would surface to its neighbors (read EOF on both of A's sockets).
// The survivors must run an election and converge on the same (higher-id)
// leader.
#[tokio::test]
async fn leader_loss_triggers_election_among_survivors() {
    let (a, _) = node(19121);
    let (b, _) = node(19122);
    let (c, _) = node(19123);

    a.start_network(19121).await;
    b.join_network(loopback(19121), 19122).await;
    c.join_network(loopback(19121), 19123).await;

    let formed = wait_until(
        || {
            [&a, &b, &c].iter().all(|ctrl| {
                ctrl.network_state() == NetworkState::Ring
                    && ctrl.context().registry.by_relation(Relation::Next).is_some()
                    && ctrl.context().registry.by_relation(Relation::Prev).is_some()
            })
        },
        Duration::from_secs(3),
    )
    .await;
    assert!(formed, "ring never formed before killing the leader");

    let survivor_higher_id = std::cmp::max(b.node_id(), c.node_id());

    a.disconnect().await;

    let elected = wait_until(
        || {
            let bl = b.leader_id();
            let cl = c.leader_id();
            !bl.is_zero() && bl == cl
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(elected, "survivors never agreed on a new leader");
    assert_eq!(b.leader_id(), survivor_higher_id);
    assert_eq!(c.leader_id(), survivor_higher_id);

    b.disconnect().await;
    c.disconnect().await;
}

// Ring repair via second-successor. Four nodes join sequentially through
// the same bootstrap, then the node sitting between the other two joiners is
// torn down; the remaining three must close back into a valid ring without
// anyone crashing or hanging.
#[tokio::test]
async fn ring_repairs_around_a_lost_middle_node() {
    let (a, _) = node(19131);
    let (n1, _) = node(19132);
    let (n2, _) = node(19133);
    let (n3, _) = node(19134);

    a.start_network(19131).await;
    n1.join_network(loopback(19131), 19132).await;
    wait_until(|| n1.network_state() == NetworkState::Ring, Duration::from_secs(2)).await;
    n2.join_network(loopback(19131), 19133).await;
    wait_until(|| n2.network_state() == NetworkState::Ring, Duration::from_secs(2)).await;
    n3.join_network(loopback(19131), 19134).await;

    let formed = wait_until(
        || {
            [&a, &n1, &n2, &n3].iter().all(|ctrl| {
                ctrl.network_state() == NetworkState::Ring
                    && ctrl.context().registry.by_relation(Relation::Next).is_some()
                    && ctrl.context().registry.by_relation(Relation::Prev).is_some()
            })
        },
        Duration::from_secs(3),
    )
    .await;
    assert!(formed, "four-node ring never formed");

    // Insertion always happens right after A, so the chain is
    // A -> n3 -> n2 -> n1 -> A: n2 sits strictly between the other two
    // joiners and is neither the bootstrap nor adjacent to it on both sides.
    n2.disconnect().await;

    let mut by_id = std::collections::HashMap::new();
    by_id.insert(a.node_id(), &a);
    by_id.insert(n1.node_id(), &n1);
    by_id.insert(n3.node_id(), &n3);

    let repaired = wait_until(
        || {
            [&a, &n1, &n3].iter().all(|ctrl| {
                ctrl.network_state() == NetworkState::Ring
                    && ctrl.context().registry.by_relation(Relation::Next).is_some()
                    && ctrl.context().registry.by_relation(Relation::Prev).is_some()
            })
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(repaired, "ring never repaired after losing the middle node");

    let visited = walk_next(&by_id, a.node_id(), 3);
    assert_eq!(visited.last().copied(), Some(a.node_id()), "repaired chain did not close back to A");
    let distinct: std::collections::HashSet<_> = visited[..2].iter().copied().collect();
    assert_eq!(distinct.len(), 2);
    assert!(distinct.contains(&n1.node_id()));
    assert!(distinct.contains(&n3.node_id()));
    assert!(!distinct.contains(&n2.node_id()));

    a.disconnect().await;
    n1.disconnect().await;
    n3.disconnect().await;
}

// Chat fan-out. Two ring members opt into chat; the leader should broadcast
// a joint userlist and rebroadcast a submitted chat line to both.
#[tokio::test]
async fn chat_messages_fan_out_to_all_followers() {
    let (a, _a_sink) = node(19141);
    let (b, b_sink) = node(19142);
    let (c, c_sink) = node(19143);

    a.start_network(19141).await;
    b.join_network(loopback(19141), 19142).await;
    c.join_network(loopback(19141), 19143).await;

    wait_until(
        || [&a, &b, &c].iter().all(|ctrl| ctrl.network_state() == NetworkState::Ring),
        Duration::from_secs(3),
    )
    .await;

    b.set_nickname("alice".to_owned());
    c.set_nickname("bob".to_owned());
    b.set_chat_participation(true).await;
    c.set_chat_participation(true).await;

    let both_following = wait_until(|| a.context().followers.len() == 2, Duration::from_secs(3)).await;
    assert!(both_following, "leader never saw both followers connect");

    b.send_chat_message("hi".to_owned()).await;

    let delivered = wait_until(
        || {
            b_sink.chat_messages.lock().unwrap().iter().any(|(u, t)| u == "alice" && t == "hi")
                && c_sink.chat_messages.lock().unwrap().iter().any(|(u, t)| u == "alice" && t == "hi")
        },
        Duration::from_secs(3),
    )
    .await;
    assert!(delivered, "chat message was not fanned out to both followers");

    let last_userlist = c_sink
        .user_lists
        .lock()
        .unwrap()
        .iter()
        .rev()
        .find_map(|l| l.clone())
        .expect("no userlist ever delivered to c");
    let names: std::collections::HashSet<_> = last_userlist.into_iter().collect();
    assert_eq!(names, ["alice".to_owned(), "bob".to_owned()].into_iter().collect());

    a.disconnect().await;
    b.disconnect().await;
    c.disconnect().await;
}
