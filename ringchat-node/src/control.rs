use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ringchat_core::{NodeId, RingConfig};

use crate::chat;
use crate::context::PeerContext;
use crate::controller;
use crate::sink::EventSink;

/// The public entry point for a command-processor/UI layer: one
/// `ControlSurface` per process, wrapping the single shared `PeerContext`
/// every background task also holds a handle to.
#[derive(Clone)]
pub struct ControlSurface {
    ctx: Arc<PeerContext>,
}

impl ControlSurface {
    pub fn new(listen_ip: Ipv4Addr, listen_port: u16, config: RingConfig, sink: Arc<dyn EventSink>) -> ControlSurface {
        let node_id = NodeId::new(listen_ip, listen_port, rand::random());
        ControlSurface {
            ctx: PeerContext::new(node_id, config, sink),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.ctx.node_id
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_listening()
    }

    pub fn leader_id(&self) -> NodeId {
        self.ctx.leader_id()
    }

    pub fn is_chat_participant(&self) -> bool {
        self.ctx.is_chat_participant()
    }

    pub fn network_state(&self) -> crate::context::NetworkState {
        self.ctx.network_state()
    }

    /// Starts a brand-new network, becoming its single-node leader.
    pub async fn start_network(&self, port: u16) {
        controller::start_network(self.ctx.clone(), port).await;
    }

    /// Joins an existing network through `bootstrap`.
    pub async fn join_network(&self, bootstrap: SocketAddr, port: u16) {
        controller::join_network(self.ctx.clone(), bootstrap, port).await;
    }

    /// Leaves the network this node currently belongs to, if any.
    pub async fn disconnect(&self) {
        controller::leave(self.ctx.clone()).await;
    }

    pub fn set_nickname(&self, nickname: String) {
        self.ctx.set_nickname(nickname);
    }

    /// Opts into chat: connects to the current leader as a follower, if one
    /// is known. A no-op if a leader has not yet been elected; the
    /// connection happens automatically once `handle_new_leader` fires.
    pub async fn set_chat_participation(&self, enabled: bool) {
        self.ctx.chat_participation.store(enabled, Ordering::SeqCst);
        if enabled {
            let leader_id = self.ctx.leader_id();
            if leader_id.is_zero() {
                self.ctx.sink.user_error("no leader known yet, will join chat once one is elected");
            } else {
                crate::election::reconnect_to_leader(self.ctx.clone(), leader_id).await;
            }
        } else {
            if let Some(leader_conn) = self.ctx.leader_connection.lock().await.take() {
                leader_conn.close().await;
            }
            chat::reset_followers(&self.ctx);
        }
    }

    /// Submits a chat line. If this node is the leader it is broadcast
    /// directly; otherwise it is forwarded over the existing leader
    /// connection.
    pub async fn send_chat_message(&self, text: String) {
        if !self.ctx.is_chat_participant() {
            self.ctx.sink.user_error("not participating in chat");
            return;
        }

        if self.ctx.leader_id() == self.ctx.node_id {
            chat::handle_chat_message_send_as_leader(&self.ctx, text).await;
            return;
        }

        let guard = self.ctx.leader_connection.lock().await;
        match guard.as_ref() {
            Some(leader) => {
                let _ = leader
                    .send(&self.ctx, ringchat_core::Verb::ChatMessageSend { text })
                    .await;
            }
            None => self.ctx.sink.user_error("no leader connection available"),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl ControlSurface {
    /// Exposes the underlying `PeerContext` so integration tests can inspect
    /// ring/registry state directly instead of reverse-engineering it from
    /// `EventSink` callbacks.
    pub fn context(&self) -> &Arc<PeerContext> {
        &self.ctx
    }
}
