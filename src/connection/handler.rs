// src/connection/handler.rs

//! Per-connection request/reply loop for a storage node, stripped down to
//! the shape this protocol actually needs: there is no pub/sub, no TLS, no
//! replica hand-off mid-connection — every frame on a storage-node socket
//! is an independent request that gets exactly one reply.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::core::node::context::NodeContext;
use crate::core::node::dispatch::dispatch;
use crate::core::protocol::command::WireCommand;
use crate::core::protocol::wire::{framed_codec, Reply, Request};

/// Owns the framed socket for one client (or peer-node) connection and
/// drives its request/reply loop until the peer disconnects or the server
/// shuts down.
pub struct ConnectionHandler {
    framed: Framed<TcpStream, tokio_util::codec::LengthDelimitedCodec>,
    addr: SocketAddr,
    ctx: Arc<NodeContext>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    pub fn new(
        socket: TcpStream,
        addr: SocketAddr,
        ctx: Arc<NodeContext>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        ConnectionHandler { framed: Framed::new(socket, framed_codec()), addr, ctx, shutdown_rx }
    }

    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!(addr = %self.addr, "connection handler shutting down");
                    break;
                }

                frame = self.framed.next() => {
                    match frame {
                        Some(Ok(payload)) => {
                            let reply = self.handle_frame(payload.freeze()).await;
                            if let Err(e) = self.framed.send(reply.encode()).await {
                                warn!(addr = %self.addr, error = %e, "failed to write reply");
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(addr = %self.addr, error = %e, "frame decode error");
                            break;
                        }
                        None => {
                            debug!(addr = %self.addr, "connection closed by peer");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, payload: bytes::Bytes) -> Reply {
        let req = match Request::decode(payload) {
            Ok(req) => req,
            Err(e) => return Reply::err(&e),
        };
        let cmd = match WireCommand::parse(&req) {
            Ok(cmd) => cmd,
            Err(e) => return Reply::err(&e),
        };
        dispatch(&self.ctx, &req, cmd).await
    }
}
