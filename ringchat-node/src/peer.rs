use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use ringchat_core::{Message, NodeId, Relation, Verb};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::context::PeerContext;

/// One peer connection: owns the write half of a single TCP socket,
/// classified by `relation`, with its own keep-alive timer.
///
/// The read half lives in the spawned reader task (`connection::run_reader`)
/// instead of on `Peer` itself, since only one task ever reads a socket
/// while sends can originate from any task (election timer, ring repair,
/// chat broadcast), so a Peer's own lock is never held across a network
/// write.
pub struct Peer {
    id: StdMutex<NodeId>,
    relation: StdMutex<Relation>,
    connected: AtomicBool,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send>>,
    keepalive: StdMutex<Option<JoinHandle<()>>>,
    addr: Option<SocketAddr>,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id())
            .field("relation", &self.relation())
            .field("connected", &self.is_connected())
            .field("addr", &self.addr)
            .finish()
    }
}

impl Peer {
    pub fn new(writer: Box<dyn AsyncWrite + Unpin + Send>, addr: Option<SocketAddr>) -> Arc<Peer> {
        Arc::new(Peer {
            id: StdMutex::new(NodeId::ZERO),
            relation: StdMutex::new(Relation::None),
            connected: AtomicBool::new(true),
            writer: AsyncMutex::new(writer),
            keepalive: StdMutex::new(None),
            addr,
        })
    }

    pub fn id(&self) -> NodeId {
        *self.id.lock().unwrap()
    }

    pub fn set_id(&self, id: NodeId) {
        *self.id.lock().unwrap() = id;
    }

    pub fn relation(&self) -> Relation {
        *self.relation.lock().unwrap()
    }

    pub fn set_relation(&self, relation: Relation) {
        *self.relation.lock().unwrap() = relation;
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Encodes and writes one message, bounded by `send_message_timeout`.
    /// A write failure or timed-out write marks the peer disconnected; the
    /// reader task is left to observe the resulting EOF and run
    /// `handle_disconnect`.
    #[tracing::instrument(level = "debug", skip(self, ctx, verb), fields(peer = %self.id(), verb = verb.name()))]
    pub async fn send(&self, ctx: &PeerContext, verb: Verb) -> ringchat_core::Result<()> {
        let timestamp = ctx.clock.advance();
        let message = Message::new(timestamp, verb);
        let mut line = message.encode();
        line.push('\n');

        let timeout = ctx.config.send_message_timeout();
        let mut writer = self.writer.lock().await;
        let result = tokio::time::timeout(timeout, writer.write_all(line.as_bytes())).await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "write failed, disconnecting peer");
                self.mark_disconnected();
                Err(e.into())
            }
            Err(_elapsed) => {
                tracing::warn!("write deadline exceeded, disconnecting peer");
                self.mark_disconnected();
                Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "send_message_timeout exceeded").into())
            }
        }
    }

    /// Shuts the write half down, nudging the reader task toward EOF without
    /// waiting for the remote end. Used when a connection is demoted or
    /// superseded (e.g. an `old_next` during a new joiner's admission).
    pub async fn close(&self) {
        self.mark_disconnected();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    fn set_keepalive_handle(&self, handle: JoinHandle<()>) {
        let mut guard = self.keepalive.lock().unwrap();
        if let Some(old) = guard.replace(handle) {
            old.abort();
        }
    }

    pub fn abort_keepalive(&self) {
        if let Some(handle) = self.keepalive.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// (Re-)arms the keep-alive timer: fires once after
    /// `keepalive_interval`, pings if this connection addresses a `next` or
    /// `leader`, then re-arms itself. Called both from the reader loop on
    /// every inbound line and recursively by the fired timer itself, so a
    /// quiet-but-alive connection keeps pinging forever.
    pub fn rearm_keepalive(self: &Arc<Peer>, ctx: Arc<PeerContext>) {
        let interval = ctx.config.keepalive_interval();
        let peer = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if !peer.is_connected() {
                return;
            }
            if matches!(peer.relation(), Relation::Next | Relation::Leader) {
                let _ = peer.send(&ctx, Verb::AliveCheck).await;
            }
            if peer.is_connected() {
                peer.rearm_keepalive(ctx);
            }
        });
        self.set_keepalive_handle(handle);
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Peer {
    /// Wires a `Peer` to one half of an in-memory duplex stream, returning
    /// the other half so tests can assert on what was written or feed
    /// scripted input to a reader task.
    pub fn test_pair(id: NodeId) -> (Arc<Peer>, tokio::io::DuplexStream) {
        let (local, remote) = tokio::io::duplex(8192);
        let peer = Peer::new(Box::new(local), None);
        peer.set_id(id);
        (peer, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn send_writes_a_newline_terminated_encoded_line() {
        let ctx = test_context();
        let (peer, mut remote) = Peer::test_pair(NodeId::new(Ipv4Addr::new(127, 0, 0, 1), 9000, 1));
        peer.send(&ctx, Verb::AliveCheck).await.unwrap();

        let mut buf = vec![0u8; 256];
        let n = remote.read(&mut buf).await.unwrap();
        let line = String::from_utf8_lossy(&buf[..n]);
        assert!(line.ends_with('\n'));
        assert!(line.contains("alivecheck"));
    }

    #[tokio::test]
    async fn close_marks_disconnected() {
        let (peer, _remote) = Peer::test_pair(NodeId::new(Ipv4Addr::new(127, 0, 0, 1), 9000, 1));
        assert!(peer.is_connected());
        peer.close().await;
        assert!(!peer.is_connected());
    }
}
