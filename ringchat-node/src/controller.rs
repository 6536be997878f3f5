use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ringchat_core::{NodeId, Relation, Verb};
use tokio::net::{TcpListener, TcpStream};

use crate::chat;
use crate::connection::spawn_peer;
use crate::context::{NetworkState, PeerContext};
use crate::election;
use crate::peer::Peer;

/// Dials a bootstrap, next, or ring-repair target. Accepts anything
/// `TcpStream::connect` does, including the `"ip:port"` strings `NodeId`
/// produces.
pub async fn dial<A: tokio::net::ToSocketAddrs>(addr: A) -> std::io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

/// Transitions network state and, on entering `SingleNode`, makes this node
/// its own leader immediately rather than waiting out an election timer
/// nobody else would answer.
pub async fn update_network_state(ctx: &Arc<PeerContext>, state: NetworkState) {
    let previous = {
        let mut guard = ctx.network_state.lock().unwrap();
        let previous = *guard;
        *guard = state;
        previous
    };
    if previous != state {
        tracing::info!(?previous, ?state, "network state changed");
    }

    if state == NetworkState::SingleNode {
        ctx.twice_next_id.store(0, Ordering::SeqCst);
        election::handle_new_leader(ctx, ctx.node_id).await;
    }
}

/// Starts a brand-new ring: listen for peers, and become single-node leader
/// immediately.
pub async fn start_network(ctx: Arc<PeerContext>, port: u16) {
    if ctx.is_listening() {
        ctx.sink.user_error("already connected to a network");
        return;
    }
    match spawn_listener(ctx.clone(), port).await {
        Ok(addr) => {
            update_network_state(&ctx, NetworkState::SingleNode).await;
            ctx.sink.user_event(&format!("started a new network, listening on {addr}"));
        }
        Err(e) => ctx.sink.user_error(&format!("failed to listen on port {port}: {e}")),
    }
    ctx.sink.update_status();
}

/// Joins an existing ring by dialing a bootstrap peer and sending
/// `connect(self, none)` over that connection.
///
/// The dialer labels its own outbound connection `prev` locally before the
/// handshake even starts; the bootstrap peer only learns the reciprocal
/// `next` relation once it receives this `connect`.
pub async fn join_network(ctx: Arc<PeerContext>, bootstrap: SocketAddr, port: u16) {
    if ctx.is_listening() {
        ctx.sink.user_error("already connected to a network");
        return;
    }
    if let Err(e) = spawn_listener(ctx.clone(), port).await {
        ctx.sink.user_error(&format!("failed to listen on port {port}: {e}"));
        return;
    }

    match dial(bootstrap).await {
        Ok(stream) => {
            let peer = spawn_peer(ctx.clone(), stream, bootstrap);
            peer.set_relation(Relation::Prev);
            if peer
                .send(
                    &ctx,
                    Verb::Connect {
                        id: ctx.node_id,
                        relation: Relation::None,
                        extra: vec![],
                    },
                )
                .await
                .is_err()
            {
                ctx.sink.user_error("failed to reach the bootstrap peer");
                leave(ctx.clone()).await;
                return;
            }
            ctx.sink.user_event(&format!("joining the network at {bootstrap}"));
        }
        Err(e) => {
            ctx.sink.user_error(&format!("failed to connect to {bootstrap}: {e}"));
            leave(ctx.clone()).await;
            return;
        }
    }
    ctx.sink.update_status();
}

async fn spawn_listener(ctx: Arc<PeerContext>, port: u16) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    let local_addr = listener.local_addr()?;
    *ctx.listen_addr.lock().unwrap() = Some(local_addr);

    let ctx2 = ctx.clone();
    let handle = tokio::spawn(async move { accept_loop(ctx2, listener).await });
    *ctx.listener_task.lock().unwrap() = Some(handle);
    Ok(local_addr)
}

async fn accept_loop(ctx: Arc<PeerContext>, listener: TcpListener) {
    let mut shutdown = ctx.subscribe_shutdown();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        spawn_peer(ctx.clone(), stream, addr);
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Idempotent teardown: stop listening, close every connection, and reset
/// every piece of per-network state back to its `None` baseline.
pub async fn leave(ctx: Arc<PeerContext>) {
    if !ctx.is_listening() {
        ctx.sink.user_error("not connected to a network");
        return;
    }

    ctx.notify_shutdown();
    if let Some(handle) = ctx.listener_task.lock().unwrap().take() {
        handle.abort();
    }
    *ctx.listen_addr.lock().unwrap() = None;

    for peer in ctx.registry.snapshot() {
        peer.abort_keepalive();
        peer.close().await;
        ctx.registry.remove(&peer);
    }
    if let Some(leader_conn) = ctx.leader_connection.lock().await.take() {
        leader_conn.close().await;
    }

    *ctx.network_state.lock().unwrap() = NetworkState::None;
    ctx.leader_id.store(0, Ordering::SeqCst);
    ctx.old_leader_id.store(0, Ordering::SeqCst);
    ctx.twice_next_id.store(0, Ordering::SeqCst);
    ctx.ring_broken.store(false, Ordering::SeqCst);
    ctx.election_participated.store(false, Ordering::SeqCst);
    ctx.election_start_trigger.store(false, Ordering::SeqCst);
    if let Some(handle) = ctx.election_timer.lock().unwrap().take() {
        handle.abort();
    }
    chat::reset_followers(&ctx);
    ctx.clock.reset();
    ctx.sink.set_connected_name(None);

    ctx.sink.user_event("disconnected");
    ctx.sink.update_status();
}

/// Reacts to a lost connection. A no-op once `leave()` has already reset the
/// context to `NetworkState::None`, since any tasks racing to report a
/// disconnect at that point have nothing left to repair.
pub async fn handle_disconnect(ctx: &Arc<PeerContext>, peer: &Arc<Peer>) {
    peer.mark_disconnected();
    peer.abort_keepalive();
    let relation = peer.relation();
    let lost_id = peer.id();
    ctx.registry.remove(peer);

    if ctx.network_state() == NetworkState::None {
        return;
    }

    match relation {
        Relation::Next => {
            close_ring(ctx.clone(), lost_id).await;
            let still_in_ring = ctx.network_state() == NetworkState::Ring;
            if still_in_ring && (lost_id == ctx.leader_id() || lost_id == ctx.old_leader_id()) {
                election::update_leader_id(ctx, NodeId::ZERO).await;
                ctx.election_start_trigger.store(true, Ordering::SeqCst);
            }
        }
        Relation::Leader => {
            election::update_leader_id(ctx, NodeId::ZERO).await;
        }
        Relation::Follower => {
            chat::remove_follower(ctx, peer).await;
        }
        Relation::Prev | Relation::None => {}
    }
    ctx.sink.update_status();
}

/// Ring-repair driver. Only one repair loop runs at a time per node,
/// guarded by `ring_broken`; a concurrent lost-`next` on a node already
/// mid-repair is a no-op here since the loop in flight will converge on
/// whatever the ring looks like once it settles.
pub async fn close_ring(ctx: Arc<PeerContext>, old_next_id: NodeId) {
    if ctx.ring_broken.swap(true, Ordering::SeqCst) {
        return;
    }

    let prev = match ctx.registry.by_relation(Relation::Prev) {
        Some(prev) => prev,
        None => {
            // No predecessor at all: this was the only other node in the ring.
            update_network_state(&ctx, NetworkState::SingleNode).await;
            ctx.ring_broken.store(false, Ordering::SeqCst);
            return;
        }
    };
    if prev.id() == old_next_id {
        // Two-node ring: the lost `next` and the surviving `prev` were the
        // same peer, so there is nobody left to repair toward either.
        update_network_state(&ctx, NetworkState::SingleNode).await;
        ctx.ring_broken.store(false, Ordering::SeqCst);
        return;
    }

    let twice_next_id = ctx.twice_next_id();
    let target = if !twice_next_id.is_zero() {
        match dial(twice_next_id.endpoint()).await {
            Ok(stream) => {
                let addr = stream.peer_addr().ok();
                let repaired = spawn_peer(ctx.clone(), stream, addr.unwrap_or(prev_addr(&prev)));
                repaired.set_id(twice_next_id);
                repaired
            }
            Err(e) => {
                tracing::warn!(error = %e, target = %twice_next_id, "dial to second-successor failed, retrying via prev");
                prev.clone()
            }
        }
    } else {
        prev.clone()
    };

    tokio::spawn(run_closering_loop(ctx, target));
}

fn prev_addr(prev: &Arc<Peer>) -> SocketAddr {
    prev.addr().unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)))
}

/// Re-sends `closering` toward `target` until either the ring is repaired
/// (`ring_broken` cleared by `connect(next)`) or `target` itself drops.
async fn run_closering_loop(ctx: Arc<PeerContext>, target: Arc<Peer>) {
    let interval = ctx.config.ring_repair_timeout();
    while ctx.ring_broken.load(Ordering::SeqCst) && target.is_connected() {
        tracing::debug!(target = %target.id(), "ring broken, sending closering");
        let _ = target.send(&ctx, Verb::CloseRing { sender_id: ctx.node_id }).await;
        tokio::time::sleep(interval).await;
    }
}
