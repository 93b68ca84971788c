// src/core/replication/mod.rs

//! Primary-coordinated two-phase-commit replication.
//!
//! A primary assigns every write a monotonically increasing, dense
//! sequence number and fans it out as `PREP` to every secondary in its
//! group. Secondaries may see `PREP` messages out of order (independent
//! TCP connections, independent network paths), but must *apply* them in
//! strict sequence order; `holdback` provides the buffer that enforces
//! that. `group` ties the hold-back buffer to tablet application and to
//! the primary's own ack bookkeeping.

pub mod group;
pub mod holdback;

pub use group::{Decision, PreparedEntry, ReplicationRole, SecondaryLedger};
pub use holdback::HoldbackQueue;

pub type Seq = u64;
