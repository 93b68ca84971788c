// src/core/admin/mod.rs

//! The admin control plane: a one-time topology snapshot receiver plus a
//! generic client for issuing `KILL`/`WAKE`/reads against any storage node
//! by address.

pub mod client;
pub mod state;

pub use state::{AdminState, CoordinatorTopology, GroupMembership, LoadBalancerTopology};
