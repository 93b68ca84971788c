// src/core/admin/client.rs

//! A thin client for issuing admin commands against an arbitrary storage
//! node, reused by the admin console's operator loop. Every call is a
//! single request/reply round trip over a fresh connection, exactly like
//! the replication protocol's node-to-node calls — grounded on
//! `core::protocol::oneshot::send_request`, the same helper the primary
//! uses to fan out `PREP`/`COMM`/`ABRT`.

use bytes::Bytes;

use crate::core::errors::KvError;
use crate::core::protocol::command::WireCommand;
use crate::core::protocol::oneshot::send_request;
use crate::core::protocol::wire::Reply;

async fn call(addr: &str, cmd: WireCommand) -> Result<Reply, KvError> {
    send_request(addr, &cmd.to_request()).await
}

/// `KILL`: tells the node at `addr` to stop responding to client traffic
/// without tearing down its process.
pub async fn kill(addr: &str) -> Result<(), KvError> {
    call(addr, WireCommand::Kill).await?.into_result().map(|_| ())
}

/// `WAKE`: the inverse of `kill`.
pub async fn wake(addr: &str) -> Result<(), KvError> {
    call(addr, WireCommand::Wake).await?.into_result().map(|_| ())
}

/// `GETA`: every row name the node currently holds, across all its
/// tablets.
pub async fn get_all_rows(addr: &str) -> Result<Vec<String>, KvError> {
    let payload = call(addr, WireCommand::GetAllRows).await?.into_result()?;
    Ok(split_rows(&payload))
}

/// `GETR`: every column name in `row`.
pub async fn get_row(addr: &str, row: &str) -> Result<Vec<String>, KvError> {
    let payload =
        call(addr, WireCommand::GetRow { row: Bytes::copy_from_slice(row.as_bytes()) }).await?.into_result()?;
    Ok(split_rows(&payload))
}

/// `GETV`: the raw value at `row`/`col`.
pub async fn get_value(addr: &str, row: &str, col: &str) -> Result<Bytes, KvError> {
    call(
        addr,
        WireCommand::GetValue {
            row: Bytes::copy_from_slice(row.as_bytes()),
            col: Bytes::copy_from_slice(col.as_bytes()),
        },
    )
    .await?
    .into_result()
}

fn split_rows(payload: &Bytes) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    String::from_utf8_lossy(payload).split('\u{8}').map(str::to_string).collect()
}
