//! Error types for the Electrum client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use electrum_sync::{ElectrumClient, Result};
//!
//! async fn example(client: &ElectrumClient) -> Result<()> {
//!     let banner = client.banner().await?;
//!     println!("{banner}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::Write`], [`Error::ConnectionClosed`], [`Error::NotConnected`], [`Error::Exhausted`] |
//! | Protocol | [`Error::Protocol`], [`Error::Server`] |
//! | Timing | [`Error::Timeout`], [`Error::RequestTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Tls`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::client::ConnectionState;
use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport could not be established.
    ///
    /// Returned on refused/unreachable endpoints and failed TLS handshakes.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Write attempted on a transport that is no longer open.
    #[error("Write failed: {message}")]
    Write {
        /// Description of the write failure.
        message: String,
    },

    /// Connection closed while the request was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No live connection is available for the call.
    #[error("Not connected (state: {state})")]
    NotConnected {
        /// Lifecycle state at the time of the call.
        state: ConnectionState,
    },

    /// Reconnect budget spent; the client will not reconnect on its own.
    #[error("Reconnect attempts exhausted")]
    Exhausted,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unexpected message shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Error object returned by the server for a request.
    #[error("Server error {code}: {message}")]
    Server {
        /// JSON-RPC error code (0 when the server sent a bare string).
        code: i64,
        /// Server-provided message.
        message: String,
    },

    // ========================================================================
    // Timing Errors
    // ========================================================================
    /// Operation timeout.
    ///
    /// Returned when the keep-alive ping does not resolve in time.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Request timeout.
    ///
    /// Returned when a call receives no response within the call timeout.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a write error.
    #[inline]
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write {
            message: message.into(),
        }
    }

    /// Creates a not connected error.
    #[inline]
    pub fn not_connected(state: ConnectionState) -> Self {
        Self::NotConnected { state }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a server error.
    #[inline]
    pub fn server(code: i64, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RequestTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Write { .. }
                | Self::ConnectionClosed
                | Self::NotConnected { .. }
                | Self::Exhausted
                | Self::Io(_)
        )
    }

    /// Returns `true` if this error came back from the server itself.
    #[inline]
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry once the lifecycle manager
    /// has re-established the connection.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::RequestTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected { .. }
                | Self::Write { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("connection refused");
        assert_eq!(err.to_string(), "Connection failed: connection refused");
    }

    #[test]
    fn test_server_error_display() {
        let err = Error::server(-32600, "invalid request");
        assert_eq!(err.to_string(), "Server error -32600: invalid request");
        assert!(err.is_server_error());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_not_connected_display() {
        let err = Error::not_connected(ConnectionState::Exhausted);
        assert_eq!(err.to_string(), "Not connected (state: exhausted)");
    }

    #[test]
    fn test_is_timeout() {
        let ping = Error::timeout("keepalive ping", 9000);
        let call = Error::request_timeout(RequestId::new(4), 30_000);
        let other = Error::ConnectionClosed;

        assert!(ping.is_timeout());
        assert!(call.is_timeout());
        assert!(!other.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::write("closed").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::Exhausted.is_connection_error());
        assert!(!Error::protocol("bad").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::ConnectionClosed.is_recoverable());
        assert!(!Error::Exhausted.is_recoverable());
        assert!(!Error::config("test").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
