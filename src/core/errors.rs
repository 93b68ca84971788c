// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, covering every failure kind in the wire protocol's
/// taxonomy plus the handful of internal/transport failures that arise
/// around it. Using `thiserror` gives us clean `Display` impls and `From`
/// conversions without hand-rolling either.
#[derive(Error, Debug, Clone)]
pub enum KvError {
    /// Transport or filesystem failure. Wrapped in an `Arc` so the error
    /// stays cheaply cloneable (needed to thread it through broadcast
    /// channels and hold-back queues).
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// The frame was truncated, had an unknown command tag, or was missing
    /// a required `\b` delimiter.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Decoder has not yet seen a complete frame; not a real error, just a
    /// signal to the codec to wait for more bytes.
    #[error("incomplete frame")]
    IncompleteData,

    #[error("row not found")]
    RowMissing,

    #[error("column not found")]
    ColMissing,

    #[error("row already exists")]
    RowExists,

    #[error("column already exists")]
    ColExists,

    #[error("compare value did not match current value")]
    CondMismatch,

    #[error("node is down")]
    NodeDown,

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("no assignment for key")]
    NoAssignment,

    #[error("replica group unavailable")]
    GroupUnavailable,

    #[error("no live front-end available")]
    ServiceUnavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl KvError {
    /// The wire-level reason string sent after a `-ER` reply.
    pub fn reason(&self) -> String {
        match self {
            KvError::Io(e) => format!("IO_ERROR {e}"),
            KvError::MalformedRequest(s) => format!("MALFORMED_REQUEST {s}"),
            KvError::IncompleteData => "MALFORMED_REQUEST incomplete frame".to_string(),
            KvError::RowMissing => "ROW_MISSING".to_string(),
            KvError::ColMissing => "COL_MISSING".to_string(),
            KvError::RowExists => "ROW_EXISTS".to_string(),
            KvError::ColExists => "COL_EXISTS".to_string(),
            KvError::CondMismatch => "COND_MISMATCH".to_string(),
            KvError::NodeDown => "NODE_DOWN".to_string(),
            KvError::WriteFailed(s) => format!("WRITE_FAILED {s}"),
            KvError::NoAssignment => "NO_ASSIGNMENT".to_string(),
            KvError::GroupUnavailable => "GROUP_UNAVAILABLE".to_string(),
            KvError::ServiceUnavailable => "SERVICE_UNAVAILABLE".to_string(),
            KvError::Internal(s) => format!("INTERNAL {s}"),
        }
    }

    /// Transport-level errors close the connection silently rather than
    /// producing a `-ER` reply on it.
    pub fn is_transport(&self) -> bool {
        matches!(self, KvError::Io(_) | KvError::IncompleteData)
    }
}

impl PartialEq for KvError {
    fn eq(&self, other: &Self) -> bool {
        self.reason() == other.reason()
    }
}

impl From<std::io::Error> for KvError {
    fn from(e: std::io::Error) -> Self {
        KvError::Io(Arc::new(e))
    }
}

impl From<ParseIntError> for KvError {
    fn from(e: ParseIntError) -> Self {
        KvError::MalformedRequest(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for KvError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        KvError::MalformedRequest(e.to_string())
    }
}
