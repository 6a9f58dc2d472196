//! Error types for devtools-link.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use devtools_link::{Connection, Result};
//!
//! async fn example(conn: &Connection) -> Result<()> {
//!     let status = conn.call("Browser.getVersion", serde_json::json!({})).await?;
//!     println!("{status}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectTimeout`], [`Error::NotConnected`], [`Error::ConnectionClosed`] |
//! | Request | [`Error::RequestTimeout`], [`Error::TooManyPendingRequests`] |
//! | Remote | [`Error::Remote`], [`Error::VersionMismatch`] |
//! | Contained | [`Error::Protocol`], [`Error::Callback`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |
//!
//! "Contained" errors are never returned from a public call. They exist so
//! frame anomalies and observer failures can be logged with a typed value.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

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
    /// Returned when an address or option is invalid, before any I/O.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport could not be opened.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection did not reach the open state in time.
    ///
    /// The partially started connection is torn down. A fresh
    /// connection may be attempted.
    #[error("Connect timeout after {timeout_ms}ms")]
    ConnectTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Call issued while the connection is not open.
    ///
    /// Local and immediate, no I/O is attempted.
    #[error("Not connected")]
    NotConnected,

    /// Connection terminated while the call was outstanding.
    ///
    /// Broadcast to every pending request on `destroy` or transport loss.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// A specific request exceeded its deadline.
    ///
    /// Does not affect any other in-flight request.
    #[error("Request {request_id} ({method}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Remote method of the request.
        method: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Admission limit on outstanding requests reached.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPendingRequests {
        /// Requests currently outstanding.
        pending: usize,
        /// Configured limit.
        max: usize,
    },

    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// Error object returned by the remote end.
    #[error("Remote error: {message}")]
    Remote {
        /// Message reported by the remote end.
        message: String,
    },

    /// The remote end does not implement the requested method.
    ///
    /// Usually means the local side targets a newer protocol revision
    /// than the remote end speaks.
    #[error("Method {method} not supported by remote end: {message}")]
    VersionMismatch {
        /// Remote method of the request.
        method: String,
        /// Message reported by the remote end.
        message: String,
    },

    // ========================================================================
    // Contained Errors
    // ========================================================================
    /// Frame that is neither a response nor an event.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Observer callback failed.
    #[error("Callback for {method} failed: {message}")]
    Callback {
        /// Event method the callback was registered for.
        method: String,
        /// Failure description.
        message: String,
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

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
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

    /// Creates a connect timeout error.
    #[inline]
    pub fn connect_timeout(timeout_ms: u64) -> Self {
        Self::ConnectTimeout { timeout_ms }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(
        request_id: RequestId,
        method: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self::RequestTimeout {
            request_id,
            method: method.into(),
            timeout_ms,
        }
    }

    /// Creates a too-many-pending-requests error.
    #[inline]
    pub fn too_many_pending(pending: usize, max: usize) -> Self {
        Self::TooManyPendingRequests { pending, max }
    }

    /// Creates a generic remote error.
    #[inline]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Creates a version mismatch error.
    #[inline]
    pub fn version_mismatch(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::VersionMismatch {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a callback error.
    #[inline]
    pub fn callback(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Callback {
            method: method.into(),
            message: message.into(),
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
        matches!(
            self,
            Self::ConnectTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this error originated on the remote end.
    #[inline]
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. } | Self::VersionMismatch { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectTimeout { .. }
                | Self::NotConnected
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry. A `ConnectTimeout` is only
    /// recoverable with a brand-new connection.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. }
                | Self::RequestTimeout { .. }
                | Self::TooManyPendingRequests { .. }
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
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");

        let err = Error::version_mismatch("Page.foo", "'Page.foo' wasn't found");
        assert_eq!(
            err.to_string(),
            "Method Page.foo not supported by remote end: 'Page.foo' wasn't found"
        );
    }

    #[test]
    fn test_request_timeout_display() {
        let id = RequestId::generate();
        let err = Error::request_timeout(id, "Runtime.evaluate", 250);
        assert_eq!(
            err.to_string(),
            format!("Request {id} (Runtime.evaluate) timed out after 250ms")
        );
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::connect_timeout(100).is_timeout());
        assert!(Error::request_timeout(RequestId::generate(), "m", 1).is_timeout());
        assert!(!Error::ConnectionClosed.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("x").is_connection_error());
        assert!(Error::NotConnected.is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::remote("x").is_connection_error());
    }

    #[test]
    fn test_is_remote() {
        assert!(Error::remote("boom").is_remote());
        assert!(Error::version_mismatch("m", "x").is_remote());
        assert!(!Error::NotConnected.is_remote());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::too_many_pending(100, 100).is_recoverable());
        assert!(!Error::config("bad").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::BrokenPipe, "pipe");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
