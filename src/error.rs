//! Error types for the tunnel.
//!
//! This module defines all error types used throughout the crate, on both
//! the client (duplex adapter) and relay (dispatcher) sides.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```no_run
//! use httptunnel::{Config, Result, TcpDialer};
//!
//! async fn example() -> Result<()> {
//!     let config = Config::new(TcpDialer::new("127.0.0.1:8080"));
//!     let conn = httptunnel::dial("example.com:80", config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Dial | [`Error::RelayDial`], [`Error::DestinationUnreachable`] |
//! | Session | [`Error::SessionLost`], [`Error::OutOfOrder`], [`Error::ConnectionClosed`], [`Error::AbnormalTermination`] |
//! | Protocol | [`Error::Protocol`], [`Error::Relay`], [`Error::WriteFailed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Http`], [`Error::Hyper`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::SessionToken;

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
    /// Returned when client or relay configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Dial Errors
    // ========================================================================
    /// The transport dialer could not reach the relay.
    #[error("Unable to dial relay for {addr}: {message}")]
    RelayDial {
        /// Destination address the session was for.
        addr: String,
        /// Description of the dial failure.
        message: String,
    },

    /// The relay could not reach the destination.
    ///
    /// Reported by the relay on the first exchange of a session.
    #[error("Destination {addr} unreachable: {message}")]
    DestinationUnreachable {
        /// Destination address.
        addr: String,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// The relay no longer knows this session.
    ///
    /// Fatal: the destination connection is gone and is never redialed.
    #[error("Session lost: {token}")]
    SessionLost {
        /// Token of the lost session.
        token: SessionToken,
    },

    /// An exchange arrived with an unexpected sequence number.
    #[error("Out of order exchange: expected {expected}, got {actual}")]
    OutOfOrder {
        /// Sequence number the relay expected.
        expected: u64,
        /// Sequence number carried by the exchange.
        actual: u64,
    },

    /// Session is closed and no longer accepts work.
    ///
    /// Returned to writers after close or idle shutdown.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A session worker terminated abnormally.
    #[error("Session worker terminated abnormally")]
    AbnormalTermination,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or malformed exchange.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Relay answered with an error status not covered by other variants.
    #[error("Relay error {status}: {message}")]
    Relay {
        /// HTTP status returned by the relay.
        status: u16,
        /// Message from the relay.
        message: String,
    },

    /// Writing to the destination failed on the relay.
    #[error("Write to destination failed: {message}")]
    WriteFailed {
        /// Description of the failure.
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

    /// HTTP message construction error.
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// HTTP transport error.
    #[error("HTTP transport error: {0}")]
    Hyper(#[from] hyper::Error),
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

    /// Creates a relay dial error.
    #[inline]
    pub fn relay_dial(addr: impl Into<String>, err: &IoError) -> Self {
        Self::RelayDial {
            addr: addr.into(),
            message: err.to_string(),
        }
    }

    /// Creates a destination unreachable error.
    #[inline]
    pub fn destination_unreachable(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DestinationUnreachable {
            addr: addr.into(),
            message: message.into(),
        }
    }

    /// Creates a session lost error.
    #[inline]
    pub fn session_lost(token: SessionToken) -> Self {
        Self::SessionLost { token }
    }

    /// Creates an out of order error.
    #[inline]
    pub fn out_of_order(expected: u64, actual: u64) -> Self {
        Self::OutOfOrder { expected, actual }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a relay error.
    #[inline]
    pub fn relay(status: u16, message: impl Into<String>) -> Self {
        Self::Relay {
            status,
            message: message.into(),
        }
    }

    /// Creates a write failed error.
    #[inline]
    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::RelayDial { .. }
                | Self::DestinationUnreachable { .. }
                | Self::ConnectionClosed
                | Self::Hyper(_)
                | Self::Io(_)
        )
    }

    /// Returns `true` if the relay reported the session as unusable.
    ///
    /// These errors must never be answered by opening a fresh session,
    /// since that would silently splice two destination streams together.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SessionLost { .. }
                | Self::OutOfOrder { .. }
                | Self::WriteFailed { .. }
                | Self::AbnormalTermination
        )
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<Error> for IoError {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Io(inner) => inner.kind(),
            Error::ConnectionClosed => ErrorKind::BrokenPipe,
            Error::AbnormalTermination => ErrorKind::UnexpectedEof,
            Error::RelayDial { .. } | Error::DestinationUnreachable { .. } => {
                ErrorKind::ConnectionRefused
            }
            Error::SessionLost { .. } | Error::WriteFailed { .. } => ErrorKind::ConnectionReset,
            Error::Config { .. } => ErrorKind::InvalidInput,
            Error::Protocol { .. } | Error::OutOfOrder { .. } | Error::Json(_) => {
                ErrorKind::InvalidData
            }
            _ => ErrorKind::Other,
        };
        match err {
            Error::Io(inner) => inner,
            other => IoError::new(kind, other),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::protocol("missing op header");
        assert_eq!(err.to_string(), "Protocol error: missing op header");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("idle timeout must be positive");
        assert_eq!(
            err.to_string(),
            "Configuration error: idle timeout must be positive"
        );
    }

    #[test]
    fn test_is_connection_error() {
        let dial_err = Error::relay_dial("a:1", &IoError::new(ErrorKind::Other, "refused"));
        let closed_err = Error::ConnectionClosed;
        let other_err = Error::config("test");

        assert!(dial_err.is_connection_error());
        assert!(closed_err.is_connection_error());
        assert!(!other_err.is_connection_error());
    }

    #[test]
    fn test_is_fatal() {
        let lost = Error::session_lost(SessionToken::generate());
        let order = Error::out_of_order(3, 5);
        let closed = Error::ConnectionClosed;

        assert!(lost.is_fatal());
        assert!(order.is_fatal());
        assert!(!closed.is_fatal());
    }

    #[test]
    fn test_into_io_error_kinds() {
        let io: IoError = Error::ConnectionClosed.into();
        assert_eq!(io.kind(), ErrorKind::BrokenPipe);

        let io: IoError = Error::AbnormalTermination.into();
        assert_eq!(io.kind(), ErrorKind::UnexpectedEof);

        let io: IoError = Error::session_lost(SessionToken::generate()).into();
        assert_eq!(io.kind(), ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_io_error_round_trips_unchanged() {
        let original = IoError::new(ErrorKind::AddrInUse, "busy");
        let err: Error = original.into();
        assert!(matches!(err, Error::Io(_)));

        let back: IoError = err.into();
        assert_eq!(back.kind(), ErrorKind::AddrInUse);
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
