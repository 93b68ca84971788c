// src/core/protocol/oneshot.rs

//! A single request/reply round trip over a fresh TCP connection, using
//! the storage-node wire framing. Used by every "client of another storage
//! node" role in this system: a secondary forwarding a write to its
//! primary, a primary fanning out `PREP`/`COMM`/`ABRT`, and the admin
//! console's `KILL`/`WAKE`/read commands. Grounded on
//! `core/warden/client.rs::WardenClient`, which does the same thing for
//! sentinel-to-instance round trips.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::core::errors::KvError;

use super::wire::{framed_codec, Reply, Request};

pub async fn send_request(addr: &str, req: &Request) -> Result<Reply, KvError> {
    let stream = TcpStream::connect(addr).await?;
    let mut framed = Framed::new(stream, framed_codec());
    framed.send(req.encode()).await?;
    let payload = framed
        .next()
        .await
        .ok_or(KvError::IncompleteData)??;
    Reply::decode(payload.freeze())
}

/// Like `send_request`, bounded by `timeout`. Used for the primary's
/// `PREP`/`COMM`/`ABRT` fan-out, where a secondary that has
/// gone silent must not hold up the client forever: a timeout is treated
/// the same as a transport error (`KvError::NodeDown`) by the caller.
pub async fn send_request_timeout(
    addr: &str,
    req: &Request,
    timeout: Duration,
) -> Result<Reply, KvError> {
    tokio::time::timeout(timeout, send_request(addr, req))
        .await
        .unwrap_or(Err(KvError::NodeDown))
}

/// Like `send_request`, but for admin-style probes that only care whether
/// the peer is reachable, not what it says back.
pub async fn ping(addr: &str) -> bool {
    TcpStream::connect(addr).await.is_ok()
}
