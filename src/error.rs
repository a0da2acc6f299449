//! # Error Types
//!
//! Error handling for the model server, the attack client and the wire codec.
//!
//! ## Error Categories
//! - **Codec Errors**: malformed documents, bad packet headers, oversized frames
//! - **Accounting Errors**: budget exhaustion, unknown or closed sessions, invalid budgets
//! - **Request Errors**: shape mismatches, unsupported output kinds
//! - **I/O Errors**: transport failures, timeouts, closed connections
//!
//! Errors that cross the wire are carried as `{type: "error", kind, message}`
//! documents. [`ProtocolError::kind`] names the variant on the server side and
//! [`ProtocolError::from_remote`] rebuilds it on the client side, so a
//! `BudgetExceeded` raised by a remote server is matched exactly like a local one.
//!
//! ## Example Usage
//! ```rust
//! use adversarial_protocol::error::{ProtocolError, Result};
//!
//! fn check_budget(budget: u64) -> Result<u64> {
//!     if budget == 0 {
//!         return Err(ProtocolError::InvalidBudget(budget));
//!     }
//!     Ok(budget)
//! }
//!
//! assert!(check_budget(10).is_ok());
//! assert_eq!(check_budget(0).unwrap_err().kind(), "InvalidBudget");
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lock errors
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";
    pub const ERR_REGISTRY_LOCK: &str = "Session registry lock poisoned";
    pub const ERR_SESSION_LOCK: &str = "Session lock poisoned";

    /// Document errors
    pub const ERR_TRUNCATED: &str = "document truncated";
    pub const ERR_MISSING_TERMINATOR: &str = "missing document terminator";
    pub const ERR_TRAILING_BYTES: &str = "trailing bytes after document";
    pub const ERR_NESTING_TOO_DEEP: &str = "document nesting too deep";
    pub const ERR_NUL_IN_KEY: &str = "field name contains NUL byte";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NO_SESSION: &str = "no session opened on this connection";
}

/// Primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Query budget of {budget} exceeded")]
    BudgetExceeded { budget: u64 },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid budget: {0}")]
    InvalidBudget(u64),

    #[error("Too many open sessions (limit {0})")]
    TooManySessions(usize),

    #[error("Unsupported request: {0}")]
    Unsupported(String),

    #[error("Remote error [{kind}]: {message}")]
    Remote { kind: String, message: String },

    #[error("Invalid protocol header")]
    InvalidHeader,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Wire name of this error, sent as the `kind` field of error documents.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::Io(_) => "Io",
            ProtocolError::MalformedDocument(_) => "MalformedDocument",
            ProtocolError::ShapeMismatch { .. } => "ShapeMismatch",
            ProtocolError::BudgetExceeded { .. } => "BudgetExceeded",
            ProtocolError::SessionNotFound(_) => "SessionNotFound",
            ProtocolError::InvalidBudget(_) => "InvalidBudget",
            ProtocolError::TooManySessions(_) => "TooManySessions",
            ProtocolError::Unsupported(_) => "Unsupported",
            ProtocolError::Remote { .. } => "Remote",
            ProtocolError::InvalidHeader => "InvalidHeader",
            ProtocolError::UnsupportedVersion(_) => "UnsupportedVersion",
            ProtocolError::OversizedPacket(_) => "OversizedPacket",
            ProtocolError::UnexpectedMessage => "UnexpectedMessage",
            ProtocolError::ConnectionClosed => "ConnectionClosed",
            ProtocolError::Timeout => "Timeout",
            ProtocolError::ConfigError(_) => "ConfigError",
            ProtocolError::Custom(_) => "Custom",
        }
    }

    /// Rebuild an error received in an error document.
    ///
    /// Kinds the client has to branch on (budget, shape, session, codec) come
    /// back as their own variants. Structured payloads that do not survive the
    /// trip as text (expected shapes, budgets) are left empty or zero; anything
    /// else becomes [`ProtocolError::Remote`].
    pub fn from_remote(kind: &str, message: &str) -> Self {
        match kind {
            "MalformedDocument" => ProtocolError::MalformedDocument(message.to_string()),
            "ShapeMismatch" => ProtocolError::ShapeMismatch {
                expected: Vec::new(),
                actual: Vec::new(),
            },
            "BudgetExceeded" => ProtocolError::BudgetExceeded { budget: 0 },
            "SessionNotFound" => ProtocolError::SessionNotFound(message.to_string()),
            "Unsupported" => ProtocolError::Unsupported(message.to_string()),
            "UnexpectedMessage" => ProtocolError::UnexpectedMessage,
            _ => ProtocolError::Remote {
                kind: kind.to_string(),
                message: message.to_string(),
            },
        }
    }

    /// Whether this error ends an attack run gracefully instead of failing it.
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, ProtocolError::BudgetExceeded { .. })
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
