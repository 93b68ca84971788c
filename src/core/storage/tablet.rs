// src/core/storage/tablet.rs

//! `Tablet`: the row/column store for the contiguous key range owned by one
//! storage node.
//!
//! `original_source/backend_server/include/tablet.h` keeps two separate
//! maps: `data` (row → columns, the actual content) and `row_locks` (row →
//! mutex, locking only), so that creating a row's lock entry never implies
//! the row exists for content purposes. This follows the same split —
//! `data` below is the only structure existence checks (`ROW_MISSING`) are
//! ever made against; `locks` exists purely to serialize writers to the
//! same row, including across the PREPARE→COMMIT/ABORT span of two-phase
//! commit, and a lock entry may outlive every attempt to write that row
//! without ever making the row exist in `data`.
//!
//! Locking order, mirrored from `tablet.cc`: a shared lock on the relevant
//! map is enough to look up an existing entry's `Arc`; only creating or
//! deleting an entry requires that map's lock in exclusive mode, and that
//! upgrade is never held across a row lock acquisition.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::core::errors::KvError;
use crate::core::protocol::command::WireCommand;

pub type RowData = HashMap<String, Bytes>;

/// A row's write lock, held independent of whether the row currently
/// exists in `data`. Owned rather than borrowed so it can be held across
/// `.await` points spanning a 2PC PREPARE→COMMIT/ABORT round trip.
pub type RowLock = OwnedRwLockWriteGuard<()>;

pub struct Tablet {
    pub range_start: String,
    pub range_end: String,
    data: RwLock<BTreeMap<String, RowData>>,
    locks: RwLock<BTreeMap<String, Arc<RwLock<()>>>>,
}

impl Tablet {
    pub fn new(range_start: impl Into<String>, range_end: impl Into<String>) -> Self {
        Tablet {
            range_start: range_start.into(),
            range_end: range_end.into(),
            data: RwLock::new(BTreeMap::new()),
            locks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Whether `key` falls within `[range_start, range_end]` inclusive, per
    /// the tablet's boundary contract (a key of "bzzzz" belongs to the
    /// tablet whose range runs "aa".."bz").
    pub fn in_range(&self, key: &str) -> bool {
        key >= self.range_start.as_str() && key <= self.range_end.as_str()
    }

    async fn existing_or_new_lock(&self, row: &str) -> Arc<RwLock<()>> {
        if let Some(existing) = self.locks.read().await.get(row).cloned() {
            return existing;
        }
        let mut map = self.locks.write().await;
        map.entry(row.to_string()).or_insert_with(|| Arc::new(RwLock::new(()))).clone()
    }

    /// Acquires the row's write lock, creating a lock-table entry for it if
    /// one doesn't exist yet. This never creates the row in `data` — a
    /// fresh lock just means no writer has touched this row before, not
    /// that the row has any content.
    pub async fn acquire_row_for_write(&self, row: &str) -> RowLock {
        let arc = self.existing_or_new_lock(row).await;
        arc.write_owned().await
    }

    /// Removes `row`'s lock-table entry if nothing else currently holds or
    /// is waiting on it, mirroring `tablet.cc`'s `row_locks.erase(row)`
    /// right after a successful `DELR` — otherwise `locks` would grow by one
    /// entry for every distinct row key ever written, never shrinking.
    /// Must only be called after the caller's own guard on `row` has
    /// already been dropped, or the strong-count check below always sees
    /// that still-live guard and never prunes.
    pub async fn prune_lock_if_unused(&self, row: &str) {
        let mut locks = self.locks.write().await;
        if let Some(arc) = locks.get(row) {
            if Arc::strong_count(arc) == 1 {
                locks.remove(row);
            }
        }
    }

    pub async fn get_row(&self, row: &str) -> Result<Vec<String>, KvError> {
        let data = self.data.read().await;
        let cols = data.get(row).ok_or(KvError::RowMissing)?;
        let mut names: Vec<String> = cols.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub async fn get_all_rows(&self) -> Vec<String> {
        self.data.read().await.keys().cloned().collect()
    }

    pub async fn get_value(&self, row: &str, col: &str) -> Result<Bytes, KvError> {
        let data = self.data.read().await;
        let cols = data.get(row).ok_or(KvError::RowMissing)?;
        cols.get(col).cloned().ok_or(KvError::ColMissing)
    }

    /// Creates the row and/or column if either is missing. Acquires its own
    /// row lock, since this is a one-shot convenience entry point rather
    /// than a step of an already-held 2PC transaction — see `apply_locked`
    /// for the path used while a lock is held across an `.await` boundary.
    pub async fn put_value(&self, row: &str, col: &str, val: Bytes) -> Result<(), KvError> {
        let mut guard = self.acquire_row_for_write(row).await;
        let cmd = WireCommand::PutValue {
            row: Bytes::copy_from_slice(row.as_bytes()),
            col: Bytes::copy_from_slice(col.as_bytes()),
            value: val,
        };
        self.apply_locked(row, &mut guard, &cmd).await
    }

    /// Only succeeds if `row`/`col` already exist and hold `expected`.
    /// Neither the row nor the column is created on a miss.
    pub async fn cond_put_value(
        &self,
        row: &str,
        col: &str,
        expected: &Bytes,
        new_val: Bytes,
    ) -> Result<(), KvError> {
        let mut guard = self.acquire_row_for_write(row).await;
        let cmd = WireCommand::CondPutValue {
            row: Bytes::copy_from_slice(row.as_bytes()),
            col: Bytes::copy_from_slice(col.as_bytes()),
            expected: expected.clone(),
            new_value: new_val,
        };
        self.apply_locked(row, &mut guard, &cmd).await
    }

    /// `ROW_MISSING` if the row itself doesn't exist; silently succeeds if
    /// the row exists but the column does not — `DELV` is idempotent at the
    /// column level.
    pub async fn delete_value(&self, row: &str, col: &str) -> Result<(), KvError> {
        let mut guard = self.acquire_row_for_write(row).await;
        let cmd = WireCommand::DeleteValue {
            row: Bytes::copy_from_slice(row.as_bytes()),
            col: Bytes::copy_from_slice(col.as_bytes()),
        };
        self.apply_locked(row, &mut guard, &cmd).await
    }

    pub async fn delete_row(&self, row: &str) -> Result<(), KvError> {
        let mut guard = self.acquire_row_for_write(row).await;
        let cmd = WireCommand::DeleteRow { row: Bytes::copy_from_slice(row.as_bytes()) };
        let result = self.apply_locked(row, &mut guard, &cmd).await;
        drop(guard);
        if result.is_ok() {
            self.prune_lock_if_unused(row).await;
        }
        result
    }

    pub async fn rename_row(&self, old: &str, new: &str) -> Result<(), KvError> {
        let mut guard = self.acquire_row_for_write(old).await;
        let cmd = WireCommand::RenameRow {
            old: Bytes::copy_from_slice(old.as_bytes()),
            new: Bytes::copy_from_slice(new.as_bytes()),
        };
        self.apply_locked(old, &mut guard, &cmd).await
    }

    pub async fn rename_col(&self, row: &str, old: &str, new: &str) -> Result<(), KvError> {
        let mut guard = self.acquire_row_for_write(row).await;
        let cmd = WireCommand::RenameCol {
            row: Bytes::copy_from_slice(row.as_bytes()),
            old: Bytes::copy_from_slice(old.as_bytes()),
            new: Bytes::copy_from_slice(new.as_bytes()),
        };
        self.apply_locked(row, &mut guard, &cmd).await
    }

    /// Applies a write `cmd` targeting `row_key`, given that the caller
    /// already holds `row_key`'s write lock (acquired via
    /// `acquire_row_for_write`). The lock only serializes concurrent
    /// writers to this row; every existence check here is against `data`,
    /// never against the fact that a lock entry exists — a lock can be
    /// held for a row that `data` has never seen (e.g. a `PREP` for a
    /// `CPUT` that never committed).
    ///
    /// A semantic failure here for `CPUT`/`DELC`/etc. (`ROW_MISSING`,
    /// `COND_MISMATCH`, …) is not a 2PC-level failure: the op has still
    /// been deterministically "applied" (attempted, with the same outcome
    /// on every replica) and should be relayed to the client as-is rather
    /// than aborting the replication group.
    pub async fn apply_locked(
        &self,
        row_key: &str,
        _guard: &mut RowLock,
        cmd: &WireCommand,
    ) -> Result<(), KvError> {
        match cmd {
            WireCommand::PutValue { col, value, .. } => {
                let col = as_str(col)?;
                let mut data = self.data.write().await;
                data.entry(row_key.to_string()).or_default().insert(col, value.clone());
                Ok(())
            }
            WireCommand::CondPutValue { col, expected, new_value, .. } => {
                let col = as_str(col)?;
                let mut data = self.data.write().await;
                let cols = data.get_mut(row_key).ok_or(KvError::RowMissing)?;
                match cols.get(&col) {
                    None => Err(KvError::ColMissing),
                    Some(current) if current == expected => {
                        cols.insert(col, new_value.clone());
                        Ok(())
                    }
                    Some(_) => Err(KvError::CondMismatch),
                }
            }
            WireCommand::DeleteValue { col, .. } => {
                let col = as_str(col)?;
                let mut data = self.data.write().await;
                let cols = data.get_mut(row_key).ok_or(KvError::RowMissing)?;
                cols.remove(&col);
                Ok(())
            }
            WireCommand::RenameCol { old, new, .. } => {
                let (old, new) = (as_str(old)?, as_str(new)?);
                let mut data = self.data.write().await;
                let cols = data.get_mut(row_key).ok_or(KvError::RowMissing)?;
                if !cols.contains_key(&old) {
                    return Err(KvError::ColMissing);
                }
                if cols.contains_key(&new) {
                    return Err(KvError::ColExists);
                }
                let val = cols.remove(&old).expect("checked above");
                cols.insert(new, val);
                Ok(())
            }
            WireCommand::DeleteRow { .. } => {
                let mut data = self.data.write().await;
                if data.remove(row_key).is_none() {
                    return Err(KvError::RowMissing);
                }
                Ok(())
            }
            WireCommand::RenameRow { new, .. } => {
                let new = as_str(new)?;
                let mut data = self.data.write().await;
                if !data.contains_key(row_key) {
                    return Err(KvError::RowMissing);
                }
                if data.contains_key(&new) {
                    return Err(KvError::RowExists);
                }
                let cols = data.remove(row_key).expect("checked above");
                data.insert(new, cols);
                Ok(())
            }
            other => Err(KvError::Internal(format!("{other:?} is not a write command"))),
        }
    }

    /// A consistent snapshot for persistence: the whole `data` map, taken
    /// under a single read lock (rows don't have their own lock anymore —
    /// see the module doc comment — so there's no per-row lock to take
    /// here).
    pub(crate) async fn snapshot(&self) -> BTreeMap<String, Vec<(String, Bytes)>> {
        let data = self.data.read().await;
        data.iter().map(|(row, cols)| (row.clone(), cols.iter().map(|(c, v)| (c.clone(), v.clone())).collect())).collect()
    }

    /// Replaces `data` wholesale from a loaded snapshot. `locks` is left
    /// empty: per `tablet.h`'s note that row locks never need persisting, a
    /// fresh lock is created on demand the first time a loaded row is
    /// written again.
    pub(crate) async fn load_snapshot(&self, snapshot: BTreeMap<String, Vec<(String, Bytes)>>) {
        let mut data = self.data.write().await;
        data.clear();
        for (row, cols) in snapshot {
            data.insert(row, cols.into_iter().collect());
        }
    }
}

fn as_str(b: &Bytes) -> Result<String, KvError> {
    String::from_utf8(b.to_vec()).map_err(KvError::from)
}

#[cfg(test)]
impl Tablet {
    async fn lock_count(&self) -> usize {
        self.locks.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let t = Tablet::new("a", "m");
        t.put_value("alice", "age", Bytes::from_static(b"30")).await.unwrap();
        assert_eq!(t.get_value("alice", "age").await.unwrap(), Bytes::from_static(b"30"));
    }

    #[tokio::test]
    async fn get_value_missing_row_is_row_missing() {
        let t = Tablet::new("a", "m");
        assert_eq!(t.get_value("alice", "age").await.unwrap_err(), KvError::RowMissing);
    }

    #[tokio::test]
    async fn cond_put_rejects_on_mismatch() {
        let t = Tablet::new("a", "m");
        t.put_value("alice", "age", Bytes::from_static(b"30")).await.unwrap();
        let err = t
            .cond_put_value("alice", "age", &Bytes::from_static(b"31"), Bytes::from_static(b"40"))
            .await
            .unwrap_err();
        assert_eq!(err, KvError::CondMismatch);
        assert_eq!(t.get_value("alice", "age").await.unwrap(), Bytes::from_static(b"30"));
    }

    #[tokio::test]
    async fn cond_put_does_not_create_missing_row() {
        let t = Tablet::new("a", "m");
        let err = t
            .cond_put_value("alice", "age", &Bytes::from_static(b"30"), Bytes::from_static(b"40"))
            .await
            .unwrap_err();
        assert_eq!(err, KvError::RowMissing);
        assert_eq!(t.get_all_rows().await, Vec::<String>::new());
    }

    #[tokio::test]
    async fn delete_row_on_missing_row_is_row_missing() {
        let t = Tablet::new("a", "m");
        assert_eq!(t.delete_row("alice").await.unwrap_err(), KvError::RowMissing);
    }

    #[tokio::test]
    async fn delete_value_on_missing_row_is_row_missing() {
        let t = Tablet::new("a", "m");
        assert_eq!(t.delete_value("alice", "age").await.unwrap_err(), KvError::RowMissing);
    }

    #[tokio::test]
    async fn rename_col_on_missing_row_is_row_missing() {
        let t = Tablet::new("a", "m");
        assert_eq!(t.rename_col("alice", "age", "years").await.unwrap_err(), KvError::RowMissing);
    }

    #[tokio::test]
    async fn delete_value_is_silent_on_missing_column() {
        let t = Tablet::new("a", "m");
        t.put_value("alice", "age", Bytes::from_static(b"30")).await.unwrap();
        t.delete_value("alice", "nonexistent").await.unwrap();
    }

    #[tokio::test]
    async fn rename_row_moves_all_columns() {
        let t = Tablet::new("a", "m");
        t.put_value("alice", "age", Bytes::from_static(b"30")).await.unwrap();
        t.rename_row("alice", "alicia").await.unwrap();
        assert_eq!(t.get_value("alicia", "age").await.unwrap(), Bytes::from_static(b"30"));
        assert_eq!(t.get_value("alice", "age").await.unwrap_err(), KvError::RowMissing);
    }

    #[tokio::test]
    async fn rename_row_on_missing_row_is_row_missing() {
        let t = Tablet::new("a", "m");
        assert_eq!(t.rename_row("alice", "alicia").await.unwrap_err(), KvError::RowMissing);
    }

    #[tokio::test]
    async fn in_range_is_inclusive() {
        let t = Tablet::new("aa", "bz");
        assert!(t.in_range("bzzzz"));
        assert!(!t.in_range("ca"));
    }

    #[tokio::test]
    async fn apply_locked_put_then_get() {
        let t = Tablet::new("a", "m");
        let mut guard = t.acquire_row_for_write("alice").await;
        let cmd = WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"30"),
        };
        t.apply_locked("alice", &mut guard, &cmd).await.unwrap();
        drop(guard);
        assert_eq!(t.get_value("alice", "age").await.unwrap(), Bytes::from_static(b"30"));
    }

    #[tokio::test]
    async fn apply_locked_cond_put_reports_mismatch_without_mutating() {
        let t = Tablet::new("a", "m");
        t.put_value("alice", "age", Bytes::from_static(b"30")).await.unwrap();
        let mut guard = t.acquire_row_for_write("alice").await;
        let cmd = WireCommand::CondPutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            expected: Bytes::from_static(b"31"),
            new_value: Bytes::from_static(b"99"),
        };
        let err = t.apply_locked("alice", &mut guard, &cmd).await.unwrap_err();
        assert_eq!(err, KvError::CondMismatch);
        drop(guard);
        assert_eq!(t.get_value("alice", "age").await.unwrap(), Bytes::from_static(b"30"));
    }

    /// A lock entry created by `acquire_row_for_write` on its own must not
    /// make the row appear to exist to a subsequent semantic check — this
    /// is the distinction between the lock table and `data` that the whole
    /// module exists to preserve.
    #[tokio::test]
    async fn holding_a_row_lock_without_applying_anything_leaves_the_row_missing() {
        let t = Tablet::new("a", "m");
        let guard = t.acquire_row_for_write("alice").await;
        drop(guard);
        assert_eq!(t.get_value("alice", "age").await.unwrap_err(), KvError::RowMissing);
        let mut guard = t.acquire_row_for_write("alice").await;
        let cmd = WireCommand::DeleteRow { row: Bytes::from_static(b"alice") };
        assert_eq!(t.apply_locked("alice", &mut guard, &cmd).await.unwrap_err(), KvError::RowMissing);
    }

    #[tokio::test]
    async fn delete_row_prunes_its_lock_table_entry() {
        let t = Tablet::new("a", "m");
        t.put_value("alice", "age", Bytes::from_static(b"30")).await.unwrap();
        assert_eq!(t.lock_count().await, 1);
        t.delete_row("alice").await.unwrap();
        assert_eq!(t.lock_count().await, 0);
    }

    #[tokio::test]
    async fn prune_is_a_no_op_while_another_caller_still_holds_the_lock() {
        let t = Tablet::new("a", "m");
        t.put_value("alice", "age", Bytes::from_static(b"30")).await.unwrap();

        let guard = t.acquire_row_for_write("alice").await;
        // Pruning while this guard is outstanding must not remove the entry
        // out from under it.
        t.prune_lock_if_unused("alice").await;
        assert_eq!(t.lock_count().await, 1);
        drop(guard);
        t.prune_lock_if_unused("alice").await;
        assert_eq!(t.lock_count().await, 0);
    }

    #[tokio::test]
    async fn second_acquire_blocks_until_first_releases() {
        let t = Arc::new(Tablet::new("a", "m"));
        let guard = t.acquire_row_for_write("alice").await;

        let t2 = t.clone();
        let handle = tokio::spawn(async move {
            let _second = t2.acquire_row_for_write("alice").await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        drop(guard);
        handle.await.unwrap();
    }
}
