use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use ringchat_core::Message;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::context::PeerContext;
use crate::controller;
use crate::dispatch;
use crate::peer::Peer;

/// Splits a freshly accepted or dialed socket into a `Peer` (registered
/// immediately, relation `None` until the handshake assigns one) and a
/// reader task that outlives the call.
pub fn spawn_peer(ctx: Arc<PeerContext>, stream: TcpStream, addr: SocketAddr) -> Arc<Peer> {
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();
    let peer = Peer::new(Box::new(write_half), Some(addr));
    ctx.registry.add(peer.clone());
    peer.rearm_keepalive(ctx.clone());

    let reader_ctx = ctx.clone();
    let reader_peer = peer.clone();
    tokio::spawn(async move {
        run_reader(reader_ctx, reader_peer, read_half).await;
    });

    peer
}

/// One line at a time until EOF, a decode error, a read-deadline timeout,
/// or cooperative shutdown; every successful line rearms the keep-alive
/// timer. Always ends by running `handle_disconnect`, even on clean EOF,
/// since a closed socket is still a lost connection.
async fn run_reader<R>(ctx: Arc<PeerContext>, peer: Arc<Peer>, read_half: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(read_half, LinesCodec::new());
    let mut shutdown = ctx.subscribe_shutdown();

    loop {
        let deadline = ctx.config.read_deadline();
        tokio::select! {
            result = tokio::time::timeout(deadline, lines.next()) => {
                match result {
                    Ok(Some(Ok(line))) => {
                        peer.rearm_keepalive(ctx.clone());
                        if line.trim().is_empty() {
                            continue;
                        }
                        match Message::decode(line.trim()) {
                            Ok(message) => {
                                ctx.clock.update(message.timestamp);
                                dispatch::dispatch(&ctx, &peer, message.verb).await;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, peer = %peer.id(), "malformed message, dropping connection");
                                break;
                            }
                        }
                    }
                    Ok(Some(Err(e))) => {
                        tracing::warn!(error = %e, peer = %peer.id(), "line decode error");
                        break;
                    }
                    Ok(None) => break, // clean EOF
                    Err(_elapsed) => {
                        tracing::warn!(peer = %peer.id(), "read deadline exceeded");
                        break;
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }

    controller::handle_disconnect(&ctx, &peer).await;
}
