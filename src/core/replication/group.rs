// src/core/replication/group.rs

//! Per-replica-group replication state held on a secondary: which rows are
//! currently locked awaiting a commit/abort decision, and the hold-back
//! buffer that lets `COMM`/`ABRT` messages (each its own independent TCP
//! connection) arrive out of order while still being
//! *applied* in strict sequence order. Grounded on
//! `original_source/backend_server/src/kvs_group_server.cc`'s
//! `holdback_operations` queue, reshaped around an owned row-lock guard
//! instead of that source's coarse per-tablet mutex.
//!
//! There is no equivalent ledger on the primary side: the primary drives
//! its own 2PC round trip synchronously (see `node::context::
//! primary_commit_write`) and needs nothing more than an atomic sequence
//! counter, which lives directly on `NodeContext`.

use std::collections::HashMap;

use crate::core::protocol::command::WireCommand;
use crate::core::storage::RowLock;

use super::holdback::HoldbackQueue;
use super::Seq;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationRole {
    Primary,
    Secondary,
}

/// The outcome the primary reached for a prepared sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Commit,
    Abort,
}

/// A row held locked between this secondary's `PREP` vote and the
/// primary's eventual `COMM`/`ABRT`. The guard is the row's own write
/// lock, acquired (and possibly the row created) when the `PREP` arrived;
/// holding it here keeps every other writer to this row blocked until the
/// decision is applied.
pub struct PreparedEntry {
    pub row: String,
    pub guard: RowLock,
    pub cmd: WireCommand,
}

/// A secondary's view of its replica group: rows currently prepared and
/// awaiting a decision, plus the sequence-ordered queue of decisions that
/// have arrived but may not yet be safe to apply (an earlier sequence
/// might still be outstanding).
pub struct SecondaryLedger {
    prepared: HashMap<Seq, PreparedEntry>,
    decided: HoldbackQueue<Decision>,
    /// The outcome of every sequence applied so far that a waiting
    /// `handle_commit`/`handle_abort` call has not yet collected. A
    /// connection task whose own seq got applied as part of draining a
    /// *different* seq's gap-filling decision finds its answer here
    /// instead of having produced it itself.
    applied: HashMap<Seq, Result<(), crate::core::errors::KvError>>,
}

impl SecondaryLedger {
    pub fn new() -> Self {
        SecondaryLedger { prepared: HashMap::new(), decided: HoldbackQueue::new(1), applied: HashMap::new() }
    }

    pub fn last_applied(&self) -> Seq {
        self.decided.next_expected() - 1
    }

    /// Records that `seq` is now prepared: the row lock is held and the
    /// operation is parked, awaiting `COMM`/`ABRT`.
    pub fn record_prepare(&mut self, seq: Seq, entry: PreparedEntry) {
        self.prepared.insert(seq, entry);
    }

    /// Whether `seq` already has a prepared entry parked (used to make a
    /// redelivered `PREP` idempotent).
    pub fn has_prepared(&self, seq: Seq) -> bool {
        self.prepared.contains_key(&seq)
    }

    /// Whether a decision for `seq` has already been resolved (it is
    /// strictly older than the next sequence this ledger expects). A `PREP`
    /// that only reaches this secondary after its own `ABRT` already raced
    /// past it — e.g. the primary timed out waiting on this secondary's
    /// vote and moved on — must not park a new entry for it, or the entry's
    /// row lock is never released.
    pub fn is_already_decided(&self, seq: Seq) -> bool {
        seq < self.decided.next_expected()
    }

    /// Records a decision for `seq`, returning every sequence now ready to
    /// apply in order (this message may fill a gap and release several at
    /// once). Each ready entry carries its `PreparedEntry` if one was
    /// parked — it may be absent if the decision is redelivered after
    /// already being applied and dropped.
    pub fn note_decision(&mut self, seq: Seq, decision: Decision) -> Vec<(Seq, Decision, Option<PreparedEntry>)> {
        self.decided.push(seq, decision);
        self.decided
            .drain_ready()
            .into_iter()
            .map(|(seq, decision)| (seq, decision, self.prepared.remove(&seq)))
            .collect()
    }

    /// Records the outcome of having applied (or aborted) `seq`, for
    /// whichever connection task is waiting on it to reply to the primary.
    pub fn record_outcome(&mut self, seq: Seq, outcome: Result<(), crate::core::errors::KvError>) {
        self.applied.insert(seq, outcome);
    }

    /// Takes (removes) the recorded outcome for `seq`, if one is ready.
    pub fn take_outcome(&mut self, seq: Seq) -> Option<Result<(), crate::core::errors::KvError>> {
        self.applied.remove(&seq)
    }
}

impl Default for SecondaryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn dummy_cmd() -> WireCommand {
        WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"30"),
        }
    }

    async fn dummy_entry(row: &str) -> PreparedEntry {
        let arc: Arc<RwLock<()>> = Arc::new(RwLock::new(()));
        PreparedEntry { row: row.to_string(), guard: arc.write_owned().await, cmd: dummy_cmd() }
    }

    #[tokio::test]
    async fn applies_decisions_in_order_despite_out_of_order_arrival() {
        let mut ledger = SecondaryLedger::new();
        ledger.record_prepare(1, dummy_entry("alice").await);
        ledger.record_prepare(2, dummy_entry("bob").await);

        let ready = ledger.note_decision(2, Decision::Commit);
        assert!(ready.is_empty());

        let ready = ledger.note_decision(1, Decision::Commit);
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].0, 1);
        assert_eq!(ready[1].0, 2);
        assert!(ready[0].2.is_some());
        assert!(ready[1].2.is_some());
        assert_eq!(ledger.last_applied(), 2);
    }

    #[tokio::test]
    async fn abort_releases_the_row_lock_without_a_prepared_entry_leak() {
        let mut ledger = SecondaryLedger::new();
        ledger.record_prepare(1, dummy_entry("alice").await);
        let ready = ledger.note_decision(1, Decision::Abort);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].1, Decision::Abort);
        assert!(!ledger.has_prepared(1));
    }

    #[tokio::test]
    async fn is_already_decided_reports_seqs_the_ledger_has_moved_past() {
        let mut ledger = SecondaryLedger::new();
        assert!(!ledger.is_already_decided(1));
        ledger.note_decision(1, Decision::Abort);
        assert!(ledger.is_already_decided(1));
        assert!(!ledger.is_already_decided(2));
    }
}
