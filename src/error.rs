//! Error taxonomy for transport and pool operations
//!
//! Every failure a caller can observe falls into one of six categories:
//!
//! - **Configuration** - missing or invalid config fields, raised before any
//!   connection attempt is made
//! - **Connection** - a transport failed to establish (after exhausting its
//!   retry budget) or an established stream was lost
//! - **NotConnected** - `send_request` was called while the transport was not
//!   in the Connected state; no I/O is attempted
//! - **Timeout** - no matching response arrived within the request deadline
//! - **Protocol** - a malformed or unmatched incoming message; logged and
//!   dropped at the stream level, surfaced only for outgoing serialization
//!   failures
//! - **PoolExhausted** - the connection pool is at capacity with no idle
//!   entry available
//!
//! # Error Classification
//!
//! ```rust
//! # use mcp_conduit::error::TransportError;
//! # let error = TransportError::connection("test");
//! if error.is_retryable() {
//!     // Safe to retry this operation
//! }
//!
//! if error.is_timeout() {
//!     // Operation took too long; adjust timeouts or retry
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Primary error type for all transport and pool operations
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Missing or invalid configuration fields, detected before any I/O
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Transport failed to establish or lost its connection
    #[error("connection error: {message}")]
    Connection { message: String },

    /// A request was attempted while the transport was not connected
    #[error("transport is not connected")]
    NotConnected,

    /// No matching response arrived within the request deadline
    #[error("request timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Malformed or unmatched protocol message
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Connection pool at capacity with no idle entry available
    #[error("connection pool exhausted: {message}")]
    PoolExhausted { message: String },
}

impl TransportError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create the error used to reject every request still pending when a
    /// transport's stream closes or is torn down
    pub fn disconnected() -> Self {
        Self::Connection {
            message: "transport disconnected".to_string(),
        }
    }

    /// Create a timeout error
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a pool exhaustion error
    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::PoolExhausted {
            message: message.into(),
        }
    }

    /// Determine if this error indicates a retryable condition
    ///
    /// Transient conditions (connection loss, timeouts, pool capacity) are
    /// retryable; configuration and protocol errors are not, because the same
    /// input will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } | Self::PoolExhausted { .. } => true,
            Self::Configuration { .. } | Self::NotConnected | Self::Protocol { .. } => false,
        }
    }

    /// Determine if this error indicates a connection-level issue
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::NotConnected)
    }

    /// Determine if this error represents a timeout condition
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// Outgoing serialization failures are protocol errors; incoming parse
// failures never surface here (they are logged and dropped at the stream).
impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol {
            message: err.to_string(),
        }
    }
}
