// src/core/node/mod.rs

//! A storage node's process-local state and command routing: the tablet,
//! the replication driver, and the dispatcher that ties incoming requests
//! to both.

pub mod context;
pub mod dispatch;

pub use context::NodeContext;
pub use dispatch::dispatch;
