// src/core/storage/mod.rs

//! The row/column storage engine owned by a single storage node: one
//! `Tablet` per process, managing the contiguous key range assigned to it
//! by the coordinator.

pub mod persistence;
pub mod tablet;
pub mod tablet_set;

pub use tablet::{RowData, RowLock, Tablet};
pub use tablet_set::TabletSet;
