use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use ringchat_core::{NodeId, Relation, Verb};

use crate::chat;
use crate::connection::spawn_peer;
use crate::context::{NetworkState, PeerContext};
use crate::controller;

/// Replaces `leader_id`, remembering the previous value in `old_leader_id`
/// so a disconnect that turns out to be the leader (or a stale leader
/// reference still in flight) can be recognized later.
///
/// Setting the id to zero means "no leader": clears the election flags and
/// arms a fresh randomized election timer.
pub async fn update_leader_id(ctx: &Arc<PeerContext>, id: NodeId) {
    let old = ctx.leader_id.swap(id.raw(), Ordering::SeqCst);
    ctx.old_leader_id.store(old, Ordering::SeqCst);
    ctx.election_participated.store(false, Ordering::SeqCst);
    ctx.election_start_trigger.store(false, Ordering::SeqCst);
    stop_election_timer(ctx);

    if id.is_zero() && ctx.network_state() != NetworkState::SingleNode {
        let (min, max) = ctx.config.leader_election_wait_range();
        start_election_timer(ctx.clone(), random_duration(min, max));
    }
}

fn stop_election_timer(ctx: &Arc<PeerContext>) {
    if let Some(handle) = ctx.election_timer.lock().unwrap().take() {
        handle.abort();
    }
}

/// Arms the election timer to fire `fire_election_timer` after `timeout`,
/// replacing (and aborting) whatever timer was already running.
pub fn start_election_timer(ctx: Arc<PeerContext>, timeout: Duration) {
    let ctx2 = ctx.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        fire_election_timer(ctx2).await;
    });
    if let Some(old) = ctx.election_timer.lock().unwrap().replace(handle) {
        old.abort();
    }
}

pub async fn reset_election_timer(ctx: &Arc<PeerContext>) {
    let (min, max) = ctx.config.leader_election_wait_range();
    start_election_timer(ctx.clone(), random_duration(min, max));
}

/// The randomized wait expires with no leader known: start a Chang-Roberts
/// candidacy by forwarding an `election(self)` token to `next`.
async fn fire_election_timer(ctx: Arc<PeerContext>) {
    if !ctx.leader_id().is_zero() {
        return;
    }
    if ctx.network_state() == NetworkState::SingleNode {
        controller::update_network_state(&ctx, NetworkState::SingleNode).await;
        return;
    }

    match ctx.registry.by_relation(Relation::Next) {
        Some(next) => {
            ctx.election_participated.store(true, Ordering::SeqCst);
            let _ = next
                .send(
                    &ctx,
                    Verb::Election {
                        candidate_id: ctx.node_id,
                    },
                )
                .await;
            reset_election_timer(&ctx).await;
        }
        None => {
            if ctx.registry.by_relation(Relation::Prev).is_none() {
                controller::update_network_state(&ctx, NetworkState::SingleNode).await;
            }
            // else: successor missing but predecessor present, a ring
            // repair is presumably already under way; wait for `connect(next)`
            // to consume `election_start_trigger` and retry.
        }
    }
}

fn random_duration(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span_ms = (max - min).as_millis().max(1) as u64;
    let extra = rand::thread_rng().gen_range(0..span_ms);
    min + Duration::from_millis(extra)
}

/// A new leader has been established, locally or via the `elected` token.
/// Followers are dropped (they must reconnect to the new hub), and if this
/// node itself participates in chat it redials the new leader.
pub async fn handle_new_leader(ctx: &Arc<PeerContext>, id: NodeId) {
    chat::reset_followers(ctx);
    update_leader_id(ctx, id).await;
    ctx.sink.update_status();

    if ctx.is_chat_participant() {
        reconnect_to_leader(ctx.clone(), id).await;
    }
}

/// Dials the current leader and announces chat participation, without
/// touching leader/election state. Used both by `handle_new_leader` (a
/// leader change while already participating) and directly by the control
/// surface (participation toggled on while a leader is already known).
pub async fn reconnect_to_leader(ctx: Arc<PeerContext>, leader_id: NodeId) {
    let mut guard = ctx.leader_connection.lock().await;
    if let Some(old) = guard.take() {
        old.close().await;
    }

    if leader_id == ctx.node_id {
        // We are our own leader; nothing to dial.
        return;
    }

    match controller::dial(leader_id.endpoint()).await {
        Ok(stream) => {
            let addr = stream.peer_addr().ok();
            let peer = spawn_peer(ctx.clone(), stream, addr.unwrap_or_else(|| std::net::SocketAddr::from(([0, 0, 0, 0], 0))));
            peer.set_id(leader_id);
            peer.set_relation(Relation::Leader);
            let nickname = ctx.nickname();
            let _ = peer
                .send(
                    &ctx,
                    Verb::Connect {
                        id: ctx.node_id,
                        relation: Relation::Follower,
                        extra: vec![nickname],
                    },
                )
                .await;
            *guard = Some(peer);
        }
        Err(e) => {
            drop(guard);
            ctx.sink.user_error(&format!("failed to reconnect to the leader: {e}"));
        }
    }
}
