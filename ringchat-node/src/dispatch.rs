use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ringchat_core::{NodeId, Relation, Verb};

use crate::chat;
use crate::connection::spawn_peer;
use crate::context::{NetworkState, PeerContext};
use crate::controller;
use crate::election;
use crate::peer::Peer;

/// The central state-machine switch: every decoded verb from every
/// connection passes through here. Handlers borrow `peer` rather than
/// consuming it since the reader loop keeps reading from the same
/// connection afterward.
#[tracing::instrument(level = "debug", skip(ctx, peer, verb), fields(from = %peer.id(), verb = verb.name()))]
pub async fn dispatch(ctx: &Arc<PeerContext>, peer: &Arc<Peer>, verb: Verb) {
    match verb {
        Verb::Connect { id, relation, extra } => handle_connect(ctx, peer, id, relation, extra).await,
        Verb::NetInfo {
            my_id,
            next_id,
            leader_id,
            twice_next_id,
        } => handle_netinfo(ctx, peer, my_id, next_id, leader_id, twice_next_id).await,
        Verb::CloseRing { sender_id } => handle_close_ring(ctx, peer, sender_id).await,
        Verb::Election { candidate_id } => handle_election(ctx, candidate_id).await,
        Verb::Elected { leader_id } => handle_elected(ctx, leader_id).await,
        Verb::NextInfo { new_next_id } => {
            ctx.twice_next_id.store(new_next_id.raw(), Ordering::SeqCst);
        }
        Verb::UserList { names } => ctx.sink.update_users(Some(names)),
        Verb::ChatMessageSend { text } => chat::handle_chat_message_send(ctx, peer, text).await,
        Verb::ChatMessage { user, text } => ctx.sink.chat_message_received(&user, &text),
        Verb::AliveCheck => {
            let _ = peer.send(ctx, Verb::AliveResp).await;
        }
        Verb::AliveResp => {}
    }
}

async fn handle_connect(ctx: &Arc<PeerContext>, peer: &Arc<Peer>, id: NodeId, relation: Relation, extra: Vec<String>) {
    match relation {
        Relation::None => handle_connect_none(ctx, peer, id).await,
        Relation::Prev => {
            peer.set_id(id);
            peer.set_relation(Relation::Prev);
        }
        Relation::Next => handle_connect_next(ctx, peer, id).await,
        Relation::Follower => {
            peer.set_id(id);
            let nickname = extra.into_iter().next().unwrap_or_default();
            chat::add_follower(ctx, peer.clone(), nickname).await;
        }
        Relation::Leader => {
            tracing::warn!(from = %id, "peer announced itself with relation=leader, ignoring");
        }
    }
}

/// A new node is joining through us: admit it as our `next`, displacing
/// whoever held that slot before (the ring grows by insertion right after
/// the admitting node, never by appending at the far end).
async fn handle_connect_none(ctx: &Arc<PeerContext>, peer: &Arc<Peer>, joiner_id: NodeId) {
    peer.set_id(joiner_id);
    peer.set_relation(Relation::Next);

    let old_next = ctx.registry.by_relation_excluding(Relation::Next, joiner_id);
    match old_next {
        None => {
            // We were alone (or becoming a ring for the first time): the
            // joiner's own second-successor is us (a two-node ring loops
            // straight back), and our own second-successor is now ourself
            // too, since next(next(self)) = next(joiner) = self.
            let leader_id = ctx.leader_id();
            let _ = peer
                .send(
                    ctx,
                    Verb::NetInfo {
                        my_id: ctx.node_id,
                        next_id: ctx.node_id,
                        leader_id,
                        twice_next_id: joiner_id,
                    },
                )
                .await;
            ctx.twice_next_id.store(ctx.node_id.raw(), Ordering::SeqCst);
            controller::update_network_state(ctx, NetworkState::Ring).await;
        }
        Some(old_next) => {
            let old_twice_next = ctx.twice_next_id();
            tracing::info!(old_next = %old_next.id(), joiner = %joiner_id, "inserting new next ahead of old next");
            old_next.set_relation(Relation::None);
            old_next.close().await;
            ctx.registry.remove(&old_next);

            let leader_id = ctx.leader_id();
            let _ = peer
                .send(
                    ctx,
                    Verb::NetInfo {
                        my_id: ctx.node_id,
                        next_id: old_next.id(),
                        leader_id,
                        twice_next_id: old_twice_next,
                    },
                )
                .await;
        }
    }

    if let Some(prev) = ctx.registry.by_relation(Relation::Prev) {
        let _ = prev.send(ctx, Verb::NextInfo { new_next_id: joiner_id }).await;
    }
}

/// A predecessor has (re)attached as our `next` (ring repair completing on
/// the admitting side): clear `ring_broken`, tell `prev` about the new
/// second-successor, and if an election was waiting on this repair, kick it
/// off immediately.
async fn handle_connect_next(ctx: &Arc<PeerContext>, peer: &Arc<Peer>, id: NodeId) {
    ctx.ring_broken.store(false, Ordering::SeqCst);
    peer.set_id(id);
    peer.set_relation(Relation::Next);

    match ctx.registry.by_relation(Relation::Prev) {
        Some(prev) => {
            let _ = prev.send(ctx, Verb::NextInfo { new_next_id: id }).await;
        }
        None => {
            tracing::warn!(from = %id, "accepted connect(next) with no prev of our own");
        }
    }

    if ctx.election_start_trigger.swap(false, Ordering::SeqCst) {
        election::start_election_timer(ctx.clone(), Duration::from_secs(0));
    }
}

/// Response to our own `connect(none)`: dial the successor we were told
/// about, announce ourselves as its `prev`, and adopt whatever leader it
/// reported.
async fn handle_netinfo(
    ctx: &Arc<PeerContext>,
    peer: &Arc<Peer>,
    my_id: NodeId,
    next_id: NodeId,
    leader_id: NodeId,
    twice_next_id: NodeId,
) {
    peer.set_id(my_id);
    ctx.twice_next_id.store(twice_next_id.raw(), Ordering::SeqCst);

    match controller::dial(next_id.endpoint()).await {
        Ok(stream) => {
            let addr = stream
                .peer_addr()
                .unwrap_or_else(|_| std::net::SocketAddr::from(([0, 0, 0, 0], 0)));
            let next_peer = spawn_peer(ctx.clone(), stream, addr);
            next_peer.set_id(next_id);
            next_peer.set_relation(Relation::Next);
            let _ = next_peer
                .send(
                    ctx,
                    Verb::Connect {
                        id: ctx.node_id,
                        relation: Relation::Prev,
                        extra: vec![],
                    },
                )
                .await;
            controller::update_network_state(ctx, NetworkState::Ring).await;
        }
        Err(e) => {
            tracing::warn!(error = %e, next = %next_id, "could not reach the successor we were pointed at");
            controller::close_ring(ctx.clone(), next_id).await;
        }
    }

    if !leader_id.is_zero() {
        election::handle_new_leader(ctx, leader_id).await;
    }
}

/// Ring-repair token: keep forwarding it predecessor-ward until it laps back
/// to its originator, unless we have no predecessor of our own, in which
/// case we are the break and dial straight back to close the loop.
async fn handle_close_ring(ctx: &Arc<PeerContext>, peer: &Arc<Peer>, sender_id: NodeId) {
    match ctx.registry.by_relation(Relation::Prev) {
        Some(prev) => {
            if sender_id == ctx.node_id {
                ctx.ring_broken.store(false, Ordering::SeqCst);
                tracing::debug!("closering token returned to sender, ring repaired");
            } else {
                let _ = prev.send(ctx, Verb::CloseRing { sender_id }).await;
            }
        }
        None => {
            tracing::info!(sender = %sender_id, "no prev of our own, dialing back to close the ring");
            match controller::dial(sender_id.endpoint()).await {
                Ok(stream) => {
                    let addr = stream
                        .peer_addr()
                        .unwrap_or_else(|_| std::net::SocketAddr::from(([0, 0, 0, 0], 0)));
                    let new_prev = spawn_peer(ctx.clone(), stream, addr);
                    new_prev.set_id(sender_id);
                    new_prev.set_relation(Relation::Prev);
                    let _ = new_prev
                        .send(
                            ctx,
                            Verb::Connect {
                                id: ctx.node_id,
                                relation: Relation::Next,
                                extra: vec![],
                            },
                        )
                        .await;
                    if let Some(next) = ctx.registry.by_relation(Relation::Next) {
                        let _ = new_prev.send(ctx, Verb::NextInfo { new_next_id: next.id() }).await;
                    }
                    peer.close().await;
                    ctx.registry.remove(peer);
                }
                Err(e) => {
                    tracing::warn!(error = %e, sender = %sender_id, "dial-back to closering sender failed");
                }
            }
        }
    }
}

/// Chang-Roberts candidacy token. Any in-flight leader is presumed stale
/// once an election starts circulating again.
async fn handle_election(ctx: &Arc<PeerContext>, candidate_id: NodeId) {
    if !ctx.leader_id().is_zero() {
        ctx.leader_id.store(0, Ordering::SeqCst);
    }

    let next = match ctx.registry.by_relation(Relation::Next) {
        Some(next) => next,
        None => return,
    };

    if candidate_id == ctx.node_id {
        let _ = next
            .send(
                ctx,
                Verb::Elected {
                    leader_id: ctx.node_id,
                },
            )
            .await;
        election::handle_new_leader(ctx, ctx.node_id).await;
    } else if candidate_id > ctx.node_id {
        ctx.election_participated.store(true, Ordering::SeqCst);
        let _ = next.send(ctx, Verb::Election { candidate_id }).await;
    } else if !ctx.election_participated.load(Ordering::SeqCst) {
        ctx.election_participated.store(true, Ordering::SeqCst);
        let _ = next
            .send(
                ctx,
                Verb::Election {
                    candidate_id: ctx.node_id,
                },
            )
            .await;
    }
    // candidate_id < our id and we already forwarded a (higher or equal)
    // candidacy this round: drop the token, our own candidacy subsumes it.

    election::reset_election_timer(ctx).await;
}

/// The winning id has been announced; forward it once more unless we are
/// the winner, in which case the token has lapped the ring back to us and
/// propagation stops here. We already adopted this leader when our own
/// candidacy won, so there is nothing left to do but stop the token.
async fn handle_elected(ctx: &Arc<PeerContext>, leader_id: NodeId) {
    if leader_id == ctx.node_id {
        tracing::debug!("election token returned to the winner, stopping propagation");
        return;
    }
    if let Some(next) = ctx.registry.by_relation(Relation::Next) {
        let _ = next.send(ctx, Verb::Elected { leader_id }).await;
    }
    election::handle_new_leader(ctx, leader_id).await;
}
