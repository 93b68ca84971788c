// src/core/protocol/mod.rs

//! The wire protocol: framing, the request/reply grammar, and the typed
//! command enum built on top of them.

pub mod command;
pub mod oneshot;
pub mod wire;

pub use command::WireCommand;
pub use oneshot::{send_request, send_request_timeout};
pub use wire::{Reply, Request, framed_codec};
