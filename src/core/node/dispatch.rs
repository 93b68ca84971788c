// src/core/node/dispatch.rs

//! Routes a parsed `WireCommand` to the tablet, the replication machinery,
//! or the node's kill-switch, and produces the `Reply` to send back.
//! Grounded on
//! `original_source/backend_server/src/kvs_group_server.cc::handle_command`'s
//! dispatch shape.

use bytes::Bytes;

use crate::core::errors::KvError;
use crate::core::protocol::command::WireCommand;
use crate::core::protocol::wire::{Reply, Request};

use super::context::NodeContext;

/// Top-level entry point: one call per decoded frame on a storage node
/// connection.
pub async fn dispatch(ctx: &NodeContext, req: &Request, cmd: WireCommand) -> Reply {
    match dispatch_inner(ctx, req, cmd).await {
        Ok(reply) => reply,
        Err(e) => Reply::err(&e),
    }
}

async fn dispatch_inner(ctx: &NodeContext, req: &Request, cmd: WireCommand) -> Result<Reply, KvError> {
    // A KILLED node rejects every KV command and takes no further part in
    // the replication protocol; only WAKE is accepted.
    if ctx.is_killed() && !matches!(cmd, WireCommand::Wake) {
        return Err(KvError::NodeDown);
    }

    match &cmd {
        WireCommand::GetRow { row } => {
            let row = as_str(row)?;
            let cols = ctx.tablets.lookup(&row)?.get_row(&row).await?;
            Ok(Reply::ok(Bytes::from(cols.join("\u{8}"))))
        }
        WireCommand::GetValue { row, col } => {
            let row = as_str(row)?;
            let val = ctx.tablets.lookup(&row)?.get_value(&row, &as_str(col)?).await?;
            Ok(Reply::ok(val))
        }
        WireCommand::GetAllRows => {
            let rows = ctx.tablets.get_all_rows().await;
            Ok(Reply::ok(Bytes::from(rows.join("\u{8}"))))
        }
        WireCommand::Kill => {
            ctx.kill();
            Ok(Reply::ok_empty())
        }
        WireCommand::Wake => {
            ctx.wake();
            Ok(Reply::ok_empty())
        }

        WireCommand::PutValue { .. }
        | WireCommand::CondPutValue { .. }
        | WireCommand::DeleteRow { .. }
        | WireCommand::DeleteValue { .. }
        | WireCommand::RenameRow { .. }
        | WireCommand::RenameCol { .. } => {
            if ctx.is_primary() {
                let row = as_str(cmd.target_row().expect("is_write implies target_row"))?;
                ctx.primary_commit_write(row, cmd.clone()).await?;
                Ok(Reply::ok_empty())
            } else {
                ctx.forward_to_primary(req).await
            }
        }

        WireCommand::ForwardedWrite { inner } => {
            if !ctx.is_primary() {
                return Err(KvError::Internal("forwarded write received by non-primary".into()));
            }
            let inner_cmd = WireCommand::parse(inner)?;
            let row = as_str(
                inner_cmd.target_row().ok_or_else(|| {
                    KvError::MalformedRequest("PWRT did not wrap a write command".into())
                })?,
            )?;
            ctx.primary_commit_write(row, inner_cmd).await?;
            Ok(Reply::ok_empty())
        }

        WireCommand::Prepare { seq, row, op } => {
            ctx.handle_prepare(*seq, row.clone(), op.clone()).await?;
            Ok(Reply::ok_empty())
        }
        WireCommand::Commit { seq } => {
            ctx.handle_commit(*seq).await?;
            Ok(Reply::ok_empty())
        }
        WireCommand::Abort { seq } => {
            ctx.handle_abort(*seq).await?;
            Ok(Reply::ok_empty())
        }
    }
}

fn as_str(b: &Bytes) -> Result<String, KvError> {
    String::from_utf8(b.to_vec()).map_err(KvError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::context::DEFAULT_PREPARE_TIMEOUT;
    use crate::core::storage::TabletSet;

    fn primary_ctx() -> NodeContext {
        NodeContext::new_primary(TabletSet::new(vec![("a".into(), "z".into())]), "127.0.0.1:0".into(), Vec::new(), None, DEFAULT_PREPARE_TIMEOUT)
    }

    #[tokio::test]
    async fn put_then_get_round_trips_through_dispatch() {
        let ctx = primary_ctx();
        let put = WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"30"),
        };
        let reply = dispatch(&ctx, &put.to_request(), put).await;
        assert_eq!(reply, Reply::ok_empty());

        let get = WireCommand::GetValue { row: Bytes::from_static(b"alice"), col: Bytes::from_static(b"age") };
        let reply = dispatch(&ctx, &get.to_request(), get).await;
        assert_eq!(reply, Reply::ok(Bytes::from_static(b"30")));
    }

    #[tokio::test]
    async fn killed_node_rejects_reads_and_writes_but_accepts_wake() {
        let ctx = primary_ctx();
        ctx.kill();

        let get = WireCommand::GetAllRows;
        let reply = dispatch(&ctx, &get.to_request(), get).await;
        assert_eq!(reply, Reply::err(&KvError::NodeDown));

        let wake = WireCommand::Wake;
        let reply = dispatch(&ctx, &wake.to_request(), wake).await;
        assert_eq!(reply, Reply::ok_empty());
        assert!(!ctx.is_killed());
    }

    #[tokio::test]
    async fn missing_row_reports_row_missing() {
        let ctx = primary_ctx();
        let get = WireCommand::GetValue { row: Bytes::from_static(b"nobody"), col: Bytes::from_static(b"x") };
        let reply = dispatch(&ctx, &get.to_request(), get).await;
        assert_eq!(reply, Reply::err(&KvError::RowMissing));
    }
}
