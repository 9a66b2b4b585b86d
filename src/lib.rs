//! httptunnel - Byte streams carried over HTTP request/response exchanges.
//!
//! This library lets a long-lived, ordered, full-duplex byte stream cross a
//! network path that only allows request/response traffic to an
//! intermediary relay.
//!
//! # Architecture
//!
//! The tunnel follows a client-relay model:
//!
//! - **Client**: [`Conn`] looks like an ordinary connection. Writes become
//!   `write` exchanges; reads are fed by `read` (long-poll) exchanges.
//! - **Relay**: [`Relay`] holds one real connection per session to the
//!   destination and shuttles bytes between it and the exchanges.
//!
//! Key design principles:
//!
//! - Each [`Conn`] owns two workers, one per direction, each with its own
//!   relay connection
//! - At most one exchange in flight per direction (no pipelining)
//! - The first exchange opens the session and returns its token and pin
//! - Sessions end on close, drop, idle timeout, or the first failure
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use httptunnel::{Config, Relay, Result, TcpDialer};
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Relay side
//!     let relay = Relay::builder().build()?;
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     tokio::spawn(Arc::clone(&relay).serve(listener));
//!
//!     // Client side
//!     let config = Config::new(TcpDialer::new("127.0.0.1:8080"));
//!     let mut conn = httptunnel::dial("example.com:80", config).await?;
//!
//!     conn.write_all(b"GET / HTTP/1.0\r\nHost: example.com\r\n\r\n").await?;
//!     let mut page = Vec::new();
//!     conn.read_to_end(&mut page).await?;
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`dial`], [`Conn`], [`Config`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Session token and relay pin |
//! | [`protocol`] | Exchange wire format |
//! | [`relay`] | [`Relay`], session table, options |
//! | [`transport`] | Dialers and the relay HTTP connection |

// ============================================================================
// Modules
// ============================================================================

/// Client side: the duplex adapter and its workers.
///
/// - [`Conn`] - The tunneled connection
/// - [`Config`] - Session configuration
/// - [`CloseHandle`] - Close from another task
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for sessions and relays.
pub mod identifiers;

/// Exchange wire format.
///
/// Header names, request and response encoding, error bodies.
pub mod protocol;

/// Relay side: dispatcher and session table.
///
/// Use [`Relay::builder()`] to create a relay.
pub mod relay;

/// Client transport to the relay.
///
/// The [`Dialer`] seam and the HTTP connection each worker owns.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{CloseHandle, Config, Conn, dial};

// Relay types
pub use relay::{Relay, RelayBuilder, RelayOptions, SessionStats};

// Transport types
pub use transport::{BoxedStream, Dialer, TcpDialer, boxed};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{RelayPin, SessionToken};
