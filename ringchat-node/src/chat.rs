use std::sync::Arc;

use dashmap::DashMap;
use ringchat_core::{Relation, Verb};

use crate::context::PeerContext;
use crate::peer::Peer;

/// Association from connected follower to nickname, backed by a concurrent
/// map the way the teacher crate keys its own connection tables. Invariant:
/// an entry exists iff the corresponding peer has relation `follower` and
/// the local peer is the current leader.
#[derive(Debug, Default)]
pub struct FollowerRegistry {
    followers: DashMap<usize, (Arc<Peer>, String)>,
}

/// Peers don't implement `Hash`/`Eq`; the registry keys on the `Arc`'s
/// address instead, mirroring the original's `map[*Node]string`.
fn peer_key(peer: &Arc<Peer>) -> usize {
    Arc::as_ptr(peer) as usize
}

impl FollowerRegistry {
    pub fn new() -> FollowerRegistry {
        FollowerRegistry::default()
    }

    pub fn add(&self, peer: Arc<Peer>, nickname: String) {
        self.followers.insert(peer_key(&peer), (peer, nickname));
    }

    pub fn remove(&self, peer: &Arc<Peer>) {
        self.followers.remove(&peer_key(peer));
    }

    pub fn nickname_of(&self, peer: &Arc<Peer>) -> Option<String> {
        self.followers.get(&peer_key(peer)).map(|entry| entry.value().1.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.followers.iter().map(|entry| entry.value().1.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.followers.iter().map(|entry| entry.value().0.clone()).collect()
    }

    pub fn reset(&self) {
        self.followers.clear();
    }

    pub fn len(&self) -> usize {
        self.followers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.followers.is_empty()
    }
}

/// Broadcasts `verb` to every connected follower, serialized by holding the
/// registry snapshot for the duration of one broadcast so concurrent
/// `chatmessagesend`s stay FIFO per the leader.
async fn broadcast(ctx: &Arc<PeerContext>, verb: Verb) {
    for follower in ctx.followers.snapshot() {
        let _ = follower.send(ctx, verb.clone()).await;
    }
}

async fn broadcast_userlist(ctx: &Arc<PeerContext>) {
    let names = ctx.followers.names();
    broadcast(ctx, Verb::UserList { names }).await;
}

/// A new chat participant connected via `connect(follower, nickname)`.
pub async fn add_follower(ctx: &Arc<PeerContext>, peer: Arc<Peer>, nickname: String) {
    peer.set_relation(Relation::Follower);
    ctx.followers.add(peer, nickname);
    broadcast_userlist(ctx).await;
}

/// A follower's connection was lost. Per the design decision recorded in
/// DESIGN.md, no final `userlist` is sent to the departing follower, since
/// its socket is already going away.
pub async fn remove_follower(ctx: &Arc<PeerContext>, peer: &Arc<Peer>) {
    ctx.followers.remove(peer);
    broadcast_userlist(ctx).await;
}

/// Resets the follower registry and tells the UI the list is gone. Called
/// whenever the leader changes, since followers must reconnect to whichever
/// node is now the hub.
pub fn reset_followers(ctx: &Arc<PeerContext>) {
    ctx.followers.reset();
    ctx.sink.update_users(None);
}

/// A follower submitted a chat line: resolve its nickname and rebroadcast
/// to everyone, including the sender, so it sees its own message echoed
/// back in the shared ordering.
pub async fn handle_chat_message_send(ctx: &Arc<PeerContext>, from: &Arc<Peer>, text: String) {
    let Some(nickname) = ctx.followers.nickname_of(from) else {
        tracing::warn!("chatmessagesend from an unregistered connection, dropping");
        return;
    };
    broadcast(
        ctx,
        Verb::ChatMessage {
            user: nickname,
            text,
        },
    )
    .await;
}

/// The leader submitting its own chat line. Unlike a follower's
/// `chatmessagesend`, there is no wire connection to resolve a nickname
/// from, so this renders locally in addition to broadcasting, echoing the
/// leader's own message the same way a follower's is echoed back to it.
pub async fn handle_chat_message_send_as_leader(ctx: &Arc<PeerContext>, text: String) {
    let nickname = ctx.nickname();
    ctx.sink.chat_message_received(&nickname, &text);
    broadcast(
        ctx,
        Verb::ChatMessage {
            user: nickname,
            text,
        },
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;
    use ringchat_core::NodeId;
    use std::net::Ipv4Addr;

    fn follower_id(n: u16) -> NodeId {
        NodeId::new(Ipv4Addr::new(127, 0, 0, 1), 9000, n)
    }

    #[tokio::test]
    async fn add_follower_broadcasts_userlist_to_all() {
        let ctx = test_context();
        let (alice, mut alice_rx) = Peer::test_pair(follower_id(1));
        let (bob, mut bob_rx) = Peer::test_pair(follower_id(2));
        add_follower(&ctx, alice.clone(), "alice".to_owned()).await;
        add_follower(&ctx, bob.clone(), "bob".to_owned()).await;

        assert_eq!(ctx.followers.len(), 2);

        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; 4096];
        let n = alice_rx.read(&mut buf).await.unwrap();
        let seen = String::from_utf8_lossy(&buf[..n]);
        assert!(seen.contains("userlist"));
        assert!(seen.contains("bob"));

        let n = bob_rx.read(&mut buf).await.unwrap();
        let seen = String::from_utf8_lossy(&buf[..n]);
        assert!(seen.contains("userlist"));
    }

    #[tokio::test]
    async fn chat_message_send_rebroadcasts_with_nickname() {
        let ctx = test_context();
        let (alice, mut alice_rx) = Peer::test_pair(follower_id(1));
        add_follower(&ctx, alice.clone(), "alice".to_owned()).await;

        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; 4096];
        let _ = alice_rx.read(&mut buf).await.unwrap(); // drain the userlist push

        handle_chat_message_send(&ctx, &alice, "hello".to_owned()).await;
        let n = alice_rx.read(&mut buf).await.unwrap();
        let seen = String::from_utf8_lossy(&buf[..n]);
        assert!(seen.contains("chatmessage"));
        assert!(seen.contains("alice"));
        assert!(seen.contains("hello"));
    }

    #[tokio::test]
    async fn remove_follower_drops_entry_and_rebroadcasts() {
        let ctx = test_context();
        let (alice, _alice_rx) = Peer::test_pair(follower_id(1));
        let (bob, mut bob_rx) = Peer::test_pair(follower_id(2));
        add_follower(&ctx, alice.clone(), "alice".to_owned()).await;
        add_follower(&ctx, bob.clone(), "bob".to_owned()).await;

        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; 4096];
        let _ = bob_rx.read(&mut buf).await.unwrap(); // drain the add-alice userlist
        let _ = bob_rx.read(&mut buf).await.unwrap(); // drain the add-bob userlist

        remove_follower(&ctx, &alice).await;
        assert_eq!(ctx.followers.len(), 1);
        let n = bob_rx.read(&mut buf).await.unwrap();
        let seen = String::from_utf8_lossy(&buf[..n]);
        assert!(seen.contains("userlist"));
        assert!(!seen.contains("alice"));
    }
}
