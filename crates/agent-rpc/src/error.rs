//! Transport error types

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::protocol::ErrorObject;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, RpcError>;

/// Transport failure
#[derive(Error, Debug)]
pub enum RpcError {
    /// Spawn failure, failed handshake, or no live session
    #[error("connection error: {0}")]
    Connection(String),

    /// One call's response never arrived; the session stays usable
    #[error("'{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    /// The session was torn down while the call was pending
    #[error("connection closed")]
    Closed,

    /// The helper answered with a JSON-RPC error object
    #[error("server error {code}: {message}")]
    Server {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("invalid launch configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    /// Whether the session this error came from is gone
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Closed | Self::Io(_))
    }
}

impl From<ErrorObject> for RpcError {
    fn from(err: ErrorObject) -> Self {
        Self::Server {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}
