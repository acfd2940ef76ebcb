//! Error types for the browser gateway.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use browser_gateway::{Result, Error};
//!
//! fn example(codec: &FrameCodec, bytes: &[u8]) -> Result<()> {
//!     let message = codec.decode(bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Decode | [`Error::FrameTooLarge`], [`Error::MalformedFrame`] |
//! | Auth | [`Error::AuthFailure`], [`Error::InvalidIdentity`] |
//! | Lifecycle | [`Error::IllegalStateTransition`], [`Error::InstanceNotFound`] |
//! | Transport | [`Error::ConnectionClosed`], [`Error::ListenerNotRunning`] |
//! | TLS | [`Error::TlsContextBuild`] |
//! | Telemetry | [`Error::ReportFlush`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::browser::BrowserStatus;
use crate::identifiers::{Plane, UserId};

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
    // Decode Errors (connection-terminal, never retried)
    // ========================================================================
    /// Frame declares a value length above the configured maximum.
    ///
    /// Terminal for the connection: the stream position can no longer be
    /// trusted, so the connection is reset without an ACK.
    #[error("Frame too large: {length} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared value length.
        length: u64,
        /// Configured maximum value length.
        max: u64,
    },

    /// Frame bytes do not parse as a valid frame or field body.
    ///
    /// Terminal for the connection, same as [`Error::FrameTooLarge`].
    #[error("Malformed frame: {message}")]
    MalformedFrame {
        /// Description of the structural problem.
        message: String,
    },

    // ========================================================================
    // Auth Errors
    // ========================================================================
    /// Login rejected: unknown device binding or token mismatch.
    ///
    /// The connection is closed without an ACK and no registry entry is
    /// created.
    #[error("Authentication failed for {identity}")]
    AuthFailure {
        /// The identity that failed to authenticate.
        identity: String,
    },

    /// Device identity string does not have the required shape.
    #[error("Invalid device identity: {segment:?}")]
    InvalidIdentity {
        /// The offending identity or path segment.
        segment: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Requested state transition is not in the adjacency table.
    ///
    /// Instance state is left unchanged; the caller may attempt the two-hop
    /// recovery path through `Closed`.
    #[error("Illegal state transition: {from:?} -> {to:?}")]
    IllegalStateTransition {
        /// Current state.
        from: BrowserStatus,
        /// Requested state.
        to: BrowserStatus,
    },

    /// No browser instance exists for the user id.
    #[error("Browser instance not found: {user}")]
    InstanceNotFound {
        /// The user id with no instance.
        user: UserId,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Connection is closed or its writer has gone away.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Listener operation requires a running listener.
    #[error("Listener not running: {plane}")]
    ListenerNotRunning {
        /// The plane whose listener is stopped.
        plane: Plane,
    },

    // ========================================================================
    // TLS Errors
    // ========================================================================
    /// TLS server context could not be built from the stored material.
    ///
    /// The listener logs this and falls back to plaintext framing.
    #[error("TLS context build failed: {message}")]
    TlsContextBuild {
        /// Description of the build failure.
        message: String,
    },

    // ========================================================================
    // Telemetry Errors
    // ========================================================================
    /// A traffic batch could not be delivered to the reporting sink.
    ///
    /// The batch is logged and dropped; delivery is at-most-once per flush.
    #[error("Report flush failed on {plane} plane: {message}")]
    ReportFlush {
        /// The plane whose batch failed.
        plane: Plane,
        /// Description of the send failure.
        message: String,
    },

    // ========================================================================
    // Driver Errors
    // ========================================================================
    /// The automation driver rejected or failed an operation.
    #[error("Driver error: {message}")]
    Driver {
        /// Description from the driver.
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
    /// Creates a frame-too-large error.
    #[inline]
    pub fn frame_too_large(length: u64, max: u64) -> Self {
        Self::FrameTooLarge { length, max }
    }

    /// Creates a malformed-frame error.
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Creates an authentication failure.
    #[inline]
    pub fn auth_failure(identity: impl Into<String>) -> Self {
        Self::AuthFailure {
            identity: identity.into(),
        }
    }

    /// Creates an invalid-identity error.
    #[inline]
    pub fn invalid_identity(segment: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            segment: segment.into(),
        }
    }

    /// Creates an illegal-transition error.
    #[inline]
    pub fn illegal_transition(from: BrowserStatus, to: BrowserStatus) -> Self {
        Self::IllegalStateTransition { from, to }
    }

    /// Creates an instance-not-found error.
    #[inline]
    pub fn instance_not_found(user: UserId) -> Self {
        Self::InstanceNotFound { user }
    }

    /// Creates a TLS context build error.
    #[inline]
    pub fn tls_context(message: impl Into<String>) -> Self {
        Self::TlsContextBuild {
            message: message.into(),
        }
    }

    /// Creates a report-flush error.
    #[inline]
    pub fn report_flush(plane: Plane, message: impl Into<String>) -> Self {
        Self::ReportFlush {
            plane,
            message: message.into(),
        }
    }

    /// Creates a driver error.
    #[inline]
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error must terminate the connection.
    ///
    /// Decode and auth errors poison the stream or reject the peer; the
    /// connection is reset without an ACK.
    #[inline]
    #[must_use]
    pub fn is_connection_terminal(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. }
                | Self::MalformedFrame { .. }
                | Self::AuthFailure { .. }
                | Self::ConnectionClosed
        )
    }

    /// Returns `true` if this is a decode-time error.
    #[inline]
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. } | Self::MalformedFrame { .. }
        )
    }

    /// Returns `true` if this is a lifecycle error local to one instance.
    #[inline]
    #[must_use]
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            Self::IllegalStateTransition { .. } | Self::InstanceNotFound { .. }
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
        let err = Error::frame_too_large(4_000_000, 3_145_728);
        assert_eq!(
            err.to_string(),
            "Frame too large: 4000000 bytes exceeds maximum 3145728"
        );
    }

    #[test]
    fn test_auth_failure_display() {
        let err = Error::auth_failure("860123_460001");
        assert_eq!(err.to_string(), "Authentication failed for 860123_460001");
    }

    #[test]
    fn test_is_connection_terminal() {
        assert!(Error::frame_too_large(10, 5).is_connection_terminal());
        assert!(Error::malformed("truncated header").is_connection_terminal());
        assert!(Error::auth_failure("x_y").is_connection_terminal());
        assert!(!Error::driver("busy").is_connection_terminal());
        assert!(
            !Error::illegal_transition(BrowserStatus::Ready, BrowserStatus::Recording)
                .is_connection_terminal()
        );
    }

    #[test]
    fn test_is_decode_error() {
        assert!(Error::malformed("bad wire type").is_decode_error());
        assert!(!Error::ConnectionClosed.is_decode_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "socket gone");
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
