//! Treebus Error Hierarchy
//!
//! Errors are grouped by the layer that produces them. Callers can always tell
//! a malformed request ([`KeyFormatError`]) from a wrong expectation
//! ([`Error::TypeMismatch`]) from an unavailable server ([`TransportError`])
//! from a slow one ([`Error::Timeout`]). "Not found" is never an error; the
//! store and client return `Option` for it.

use std::time::Duration;

use config::ConfigError;

use crate::proto::ValueType;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed key or name. A caller bug, never retried.
    #[error(transparent)]
    KeyFormat(#[from] KeyFormatError),

    /// A value was read back with a different type than the one stored
    #[error("Type mismatch for key '{key}': expected {expected:?}, found {actual:?}")]
    TypeMismatch {
        key: String,
        expected: ValueType,
        actual: ValueType,
    },

    /// Payload bytes disagree with their declared type tag
    #[error(transparent)]
    Value(#[from] ValueError),

    /// Channel down, closed or undecodable traffic
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Synchronous request unanswered within its deadline
    #[error("Request {command} timed out after {duration:?}")]
    Timeout { command: String, duration: Duration },

    /// Full-store snapshot export/import failures
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyFormatError {
    #[error("Key cannot be empty")]
    Empty,

    #[error("Key '{0}' cannot contain whitespace")]
    Whitespace(String),

    #[error("Key '{0}' cannot start or end with '.'")]
    DanglingSeparator(String),

    #[error("Key '{0}' cannot contain consecutive '.'")]
    ConsecutiveSeparators(String),

    #[error("Name '{0}' cannot contain '.'")]
    SeparatorInName(String),

    /// The server refused a key the client could not check locally
    #[error("Server rejected key '{0}'")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("{value_type:?} payload must be {expected} bytes, received {actual} bytes")]
    InvalidLength {
        value_type: ValueType,
        expected: usize,
        actual: usize,
    },

    #[error("{value_type:?} payload is not valid: {reason}")]
    Malformed { value_type: ValueType, reason: String },

    #[error("Unknown value type tag {0}")]
    UnknownTag(i32),

    #[error("Cannot convert JSON into {value_type:?}: {reason}")]
    Json { value_type: ValueType, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The client is between connections
    #[error("Not connected to server")]
    NotConnected,

    /// The peer closed the channel while a request was in flight
    #[error("Connection lost on {0} channel")]
    ConnectionLost(&'static str),

    #[error("Connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A frame arrived that does not decode as the expected message
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    /// A reply does not belong to the request in flight
    #[error("Reply for {actual} does not match in-flight {expected}")]
    UnexpectedReply { expected: String, actual: String },

    #[error("Server address resolution failed: {0}")]
    Resolve(String),

    /// The owning component has been shut down
    #[error("Channel closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Snapshot contains invalid node '{path}': {reason}")]
    InvalidNode { path: String, reason: String },
}

impl Error {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout { .. })
    }
}
