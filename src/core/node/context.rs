// src/core/node/context.rs

//! `NodeContext`: the per-process state a storage node's connection tasks
//! share. Handed to each connection task as a `&Arc<NodeContext>` rather
//! than reached via global state.
//! Field set grounded on `original_source/backend_server/include/
//! backend_server.h` (`is_primary`, `seq_num`, `secondary_ports`,
//! `holdback_operations`), with the primary's ack bookkeeping replaced by
//! a synchronous, per-write 2PC driver (see `primary_commit_write` below)
//! rather than that source's asynchronous ack-counting callbacks.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::core::errors::KvError;
use crate::core::protocol::command::WireCommand;
use crate::core::protocol::oneshot::{send_request, send_request_timeout};
use crate::core::protocol::wire::{Reply, Request};
use crate::core::replication::{Decision, PreparedEntry, ReplicationRole, SecondaryLedger, Seq};
use crate::core::storage::TabletSet;

/// Default PREPARE→vote wait. There is deliberately no corresponding
/// timeout on the COMMIT→ack wait: only these two timeouts are named
/// anywhere in this system.
pub const DEFAULT_PREPARE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct NodeContext {
    /// The sub-ranges this node owns: a single node may be configured with
    /// more than one contiguous range.
    pub tablets: TabletSet,
    pub role: ReplicationRole,
    pub self_addr: String,
    pub primary_addr: Option<String>,
    pub secondary_addrs: Vec<String>,
    pub persistence_path: Option<PathBuf>,
    pub prepare_timeout: Duration,
    killed: AtomicBool,
    /// Primary-only: the next sequence number to hand out. Unused (stays
    /// at 0) on a secondary.
    next_seq: AtomicU64,
    /// Secondary-only: rows currently prepared and the hold-back queue of
    /// arrived-but-maybe-not-yet-applicable decisions.
    secondary_ledger: Mutex<SecondaryLedger>,
    /// Secondary-only: wakes every `handle_commit`/`handle_abort` caller
    /// whenever the ledger advances, so a call blocked on a gap notices
    /// once some other connection task fills it.
    decision_notify: Notify,
}

impl NodeContext {
    pub fn new_primary(
        tablets: TabletSet,
        self_addr: String,
        secondary_addrs: Vec<String>,
        persistence_path: Option<PathBuf>,
        prepare_timeout: Duration,
    ) -> Self {
        NodeContext {
            tablets,
            role: ReplicationRole::Primary,
            self_addr,
            primary_addr: None,
            secondary_addrs,
            persistence_path,
            prepare_timeout,
            killed: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            secondary_ledger: Mutex::new(SecondaryLedger::new()),
            decision_notify: Notify::new(),
        }
    }

    pub fn new_secondary(
        tablets: TabletSet,
        self_addr: String,
        primary_addr: String,
        persistence_path: Option<PathBuf>,
        prepare_timeout: Duration,
    ) -> Self {
        NodeContext {
            tablets,
            role: ReplicationRole::Secondary,
            self_addr,
            primary_addr: Some(primary_addr),
            secondary_addrs: Vec::new(),
            persistence_path,
            prepare_timeout,
            killed: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            secondary_ledger: Mutex::new(SecondaryLedger::new()),
            decision_notify: Notify::new(),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.role == ReplicationRole::Primary
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
    }

    pub fn wake(&self) {
        self.killed.store(false, Ordering::Release);
    }

    /// Primary side: drives one write through the full two-phase-commit
    /// protocol and only returns once the
    /// operation is either durable across the whole group or has been
    /// group-wide aborted. The returned `Result` is the client-visible
    /// outcome: `Ok(())`/semantic errors like `CondMismatch` reflect the
    /// operation's own result once applied identically everywhere, while
    /// `Err(WriteFailed(..))` means the group never reached quorum.
    pub async fn primary_commit_write(&self, row: String, cmd: WireCommand) -> Result<(), KvError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let row_bytes = Bytes::from(row.clone());

        if !self.secondary_addrs.is_empty() {
            let prep =
                WireCommand::Prepare { seq, row: row_bytes, op: cmd.to_request() }.to_request();
            let votes = futures::future::join_all(self.secondary_addrs.iter().map(|addr| {
                let prep = prep.clone();
                let timeout = self.prepare_timeout;
                async move { send_request_timeout(addr, &prep, timeout).await }
            }))
            .await;

            if let Some(reason) = first_vote_failure(&votes) {
                self.broadcast_abort(seq).await;
                return Err(KvError::WriteFailed(reason));
            }
        }

        // Every secondary voted SECY (or there are none): apply locally
        // while holding the row lock, exactly as the secondaries did.
        let tablet = self.tablets.lookup(&row)?;
        let mut guard = tablet.acquire_row_for_write(&row).await;
        let outcome = tablet.apply_locked(&row, &mut guard, &cmd).await;
        drop(guard);
        if outcome.is_ok() && matches!(cmd, WireCommand::DeleteRow { .. }) {
            tablet.prune_lock_if_unused(&row).await;
        }

        if !self.secondary_addrs.is_empty() {
            let commit = WireCommand::Commit { seq }.to_request();
            let acks = futures::future::join_all(
                self.secondary_addrs.iter().map(|addr| send_request(addr, &commit)),
            )
            .await;
            for (addr, ack) in self.secondary_addrs.iter().zip(acks) {
                if let Err(e) = ack {
                    warn!(%addr, error = %e, "secondary did not ack COMMIT");
                }
            }
        }

        outcome
    }

    async fn broadcast_abort(&self, seq: Seq) {
        let abort = WireCommand::Abort { seq }.to_request();
        let results = futures::future::join_all(
            self.secondary_addrs.iter().map(|addr| send_request(addr, &abort)),
        )
        .await;
        for (addr, result) in self.secondary_addrs.iter().zip(results) {
            if let Err(e) = result {
                warn!(%addr, error = %e, "secondary did not ack ABORT");
            }
        }
    }

    /// Secondary side: forwards a client write to the primary over a fresh
    /// connection and returns whatever reply the primary gave.
    pub async fn forward_to_primary(&self, req: &Request) -> Result<Reply, KvError> {
        let addr = self
            .primary_addr
            .as_ref()
            .ok_or_else(|| KvError::Internal("forward_to_primary called on a primary".into()))?;
        let wrapped = WireCommand::ForwardedWrite { inner: req.clone() }.to_request();
        send_request(addr, &wrapped).await
    }

    /// Secondary side: handles `PREPARE(seq, row, op)`. Acquires (creating
    /// if necessary) the row's write lock and parks the operation; the
    /// `Ok`/`Err` returned here becomes the `SECY`/`SECN` vote the caller
    /// relays back to the primary as this request's `Reply`.
    pub async fn handle_prepare(&self, seq: Seq, row: Bytes, op: Request) -> Result<(), KvError> {
        if self.is_killed() {
            return Err(KvError::NodeDown);
        }
        // A redelivered PREP for a seq we've already parked must not
        // re-acquire the row lock (we already hold it) or stomp the
        // existing entry. Nor must a PREP that only arrives after its own
        // decision already resolved (e.g. the primary timed out on this
        // secondary's vote and sent ABRT, which reached us first) park a
        // new entry — nothing will ever collect it, leaking the row lock.
        {
            let ledger = self.secondary_ledger.lock().await;
            if ledger.has_prepared(seq) || ledger.is_already_decided(seq) {
                return Ok(());
            }
        }
        let row_str = String::from_utf8(row.to_vec())?;
        let cmd = WireCommand::parse(&op)?;
        let guard = self.tablets.lookup(&row_str)?.acquire_row_for_write(&row_str).await;
        let mut ledger = self.secondary_ledger.lock().await;
        // Re-check under the lock we'll insert with: the decision may have
        // resolved while we were off acquiring the row lock above.
        if ledger.has_prepared(seq) || ledger.is_already_decided(seq) {
            drop(guard);
            return Ok(());
        }
        ledger.record_prepare(seq, PreparedEntry { row: row_str, guard, cmd });
        Ok(())
    }

    /// Secondary side: handles `COMMIT(seq)`. The `Ok`/`Err` returned here
    /// becomes `ACKD(seq)`'s payload once this (and every earlier still
    /// outstanding) sequence has actually been applied.
    pub async fn handle_commit(&self, seq: Seq) -> Result<(), KvError> {
        self.resolve_decision(seq, Decision::Commit).await
    }

    /// Secondary side: handles `ABORT(seq)`.
    pub async fn handle_abort(&self, seq: Seq) -> Result<(), KvError> {
        self.resolve_decision(seq, Decision::Abort).await
    }

    async fn resolve_decision(&self, seq: Seq, decision: Decision) -> Result<(), KvError> {
        let ready = {
            let mut ledger = self.secondary_ledger.lock().await;
            ledger.note_decision(seq, decision)
        };
        self.apply_ready(ready).await;
        self.decision_notify.notify_waiters();

        loop {
            let notified = self.decision_notify.notified();
            tokio::pin!(notified);
            {
                let mut ledger = self.secondary_ledger.lock().await;
                if let Some(outcome) = ledger.take_outcome(seq) {
                    return outcome;
                }
            }
            notified.await;
        }
    }

    /// Applies (or, for `Abort`, simply releases) every now-ready decided
    /// entry and records its outcome for whichever task is waiting on it.
    async fn apply_ready(&self, ready: Vec<(Seq, Decision, Option<PreparedEntry>)>) {
        for (seq, decision, entry) in ready {
            let outcome = match (decision, entry) {
                (Decision::Commit, Some(mut entry)) => {
                    let result = match self.tablets.lookup(&entry.row) {
                        Ok(tablet) => tablet.apply_locked(&entry.row, &mut entry.guard, &entry.cmd).await,
                        Err(e) => Err(e),
                    };
                    drop(entry.guard);
                    if result.is_ok() && matches!(entry.cmd, WireCommand::DeleteRow { .. }) {
                        if let Ok(tablet) = self.tablets.lookup(&entry.row) {
                            tablet.prune_lock_if_unused(&entry.row).await;
                        }
                    }
                    result
                }
                (Decision::Abort, Some(entry)) => {
                    drop(entry.guard);
                    Ok(())
                }
                // Already applied and dropped by an earlier, redelivered
                // decision for this seq; nothing left to do.
                (_, None) => Ok(()),
            };
            let mut ledger = self.secondary_ledger.lock().await;
            ledger.record_outcome(seq, outcome);
        }
    }
}

/// Scans a primary's collected `PREP` votes for the first reason to
/// abort: a transport/timeout failure or an explicit `SECN`. `None` means
/// every secondary voted `SECY`.
fn first_vote_failure(votes: &[Result<Reply, KvError>]) -> Option<String> {
    votes.iter().find_map(|v| match v {
        Ok(Reply::Ok(_)) => None,
        Ok(Reply::Err(reason)) => Some(reason.clone()),
        Err(e) => Some(e.reason()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn primary_with_no_secondaries_commits_immediately() {
        let ctx = NodeContext::new_primary(
            TabletSet::new(vec![("a".into(), "z".into())]),
            "127.0.0.1:0".into(),
            Vec::new(),
            None,
            DEFAULT_PREPARE_TIMEOUT,
        );
        let cmd = WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"30"),
        };
        ctx.primary_commit_write("alice".into(), cmd).await.unwrap();
        assert_eq!(ctx.tablets.lookup("alice").unwrap().get_value("alice", "age").await.unwrap(), Bytes::from_static(b"30"));
    }

    #[tokio::test]
    async fn secondary_prepare_then_commit_applies_the_write() {
        let ctx = NodeContext::new_secondary(
            TabletSet::new(vec![("a".into(), "z".into())]),
            "127.0.0.1:0".into(),
            "127.0.0.1:1".into(),
            None,
            DEFAULT_PREPARE_TIMEOUT,
        );
        let op = WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"30"),
        }
        .to_request();
        ctx.handle_prepare(1, Bytes::from_static(b"alice"), op).await.unwrap();
        ctx.handle_commit(1).await.unwrap();
        assert_eq!(ctx.tablets.lookup("alice").unwrap().get_value("alice", "age").await.unwrap(), Bytes::from_static(b"30"));
    }

    #[tokio::test]
    async fn secondary_prepare_then_abort_leaves_tablet_untouched() {
        let ctx = NodeContext::new_secondary(
            TabletSet::new(vec![("a".into(), "z".into())]),
            "127.0.0.1:0".into(),
            "127.0.0.1:1".into(),
            None,
            DEFAULT_PREPARE_TIMEOUT,
        );
        let op = WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"30"),
        }
        .to_request();
        ctx.handle_prepare(1, Bytes::from_static(b"alice"), op).await.unwrap();
        ctx.handle_abort(1).await.unwrap();
        // `PREPARE` creates the row's lock entry, but an aborted op is
        // never applied, so the row itself never comes to exist.
        assert_eq!(ctx.tablets.lookup("alice").unwrap().get_value("alice", "age").await.unwrap_err(), KvError::RowMissing);
    }

    #[tokio::test]
    async fn redelivered_prepare_for_the_same_seq_is_a_no_op() {
        let ctx = NodeContext::new_secondary(
            TabletSet::new(vec![("a".into(), "z".into())]),
            "127.0.0.1:0".into(),
            "127.0.0.1:1".into(),
            None,
            DEFAULT_PREPARE_TIMEOUT,
        );
        let op = WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"30"),
        }
        .to_request();
        ctx.handle_prepare(1, Bytes::from_static(b"alice"), op.clone()).await.unwrap();
        // A second PREP for the same seq must not try to re-acquire
        // alice's row lock, which would otherwise deadlock against the
        // first call's still-held guard.
        ctx.handle_prepare(1, Bytes::from_static(b"alice"), op).await.unwrap();
        ctx.handle_commit(1).await.unwrap();
        assert_eq!(ctx.tablets.lookup("alice").unwrap().get_value("alice", "age").await.unwrap(), Bytes::from_static(b"30"));
    }

    #[tokio::test]
    async fn prepare_arriving_after_its_own_decision_does_not_leak_the_row_lock() {
        let ctx = NodeContext::new_secondary(
            TabletSet::new(vec![("a".into(), "z".into())]),
            "127.0.0.1:0".into(),
            "127.0.0.1:1".into(),
            None,
            DEFAULT_PREPARE_TIMEOUT,
        );
        // ABRT(1) arrives and resolves before PREP(1) ever does -- e.g. the
        // primary timed out waiting on this secondary's vote.
        ctx.handle_abort(1).await.unwrap();

        let op = WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"30"),
        }
        .to_request();
        ctx.handle_prepare(1, Bytes::from_static(b"alice"), op).await.unwrap();

        // The late PREP must not have parked an entry holding alice's row
        // lock forever: a fresh write to the same row succeeds promptly.
        let put = WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"31"),
        }
        .to_request();
        let cmd2 = WireCommand::parse(&put).unwrap();
        let tablet = ctx.tablets.lookup("alice").unwrap();
        let mut guard = tablet.acquire_row_for_write("alice").await;
        tablet.apply_locked("alice", &mut guard, &cmd2).await.unwrap();
        drop(guard);
        assert_eq!(tablet.get_value("alice", "age").await.unwrap(), Bytes::from_static(b"31"));
    }

    #[tokio::test]
    async fn secondary_commit_arriving_out_of_order_waits_for_the_gap() {
        let ctx = std::sync::Arc::new(NodeContext::new_secondary(
            TabletSet::new(vec![("a".into(), "z".into())]),
            "127.0.0.1:0".into(),
            "127.0.0.1:1".into(),
            None,
            DEFAULT_PREPARE_TIMEOUT,
        ));
        let op1 = WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"30"),
        }
        .to_request();
        let op2 = WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"31"),
        }
        .to_request();
        ctx.handle_prepare(1, Bytes::from_static(b"alice"), op1).await.unwrap();
        ctx.handle_prepare(2, Bytes::from_static(b"alice"), op2).await.unwrap();

        let ctx2 = ctx.clone();
        let seq2_done = tokio::spawn(async move { ctx2.handle_commit(2).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!seq2_done.is_finished());

        ctx.handle_commit(1).await.unwrap();
        seq2_done.await.unwrap().unwrap();
        assert_eq!(ctx.tablets.lookup("alice").unwrap().get_value("alice", "age").await.unwrap(), Bytes::from_static(b"31"));
    }
}
