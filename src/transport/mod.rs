//! Client-side transport to the relay.
//!
//! This module handles how exchanges reach the relay: a caller-supplied
//! [`Dialer`] produces a byte stream, and a `RelayConnection` speaks
//! HTTP/1.1 over it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Session worker │      HTTP/1.1 exchanges      │  Relay          │
//! │                 │◄────────────────────────────►│                 │
//! │ RelayConnection │   stream from the Dialer     │  Dispatcher     │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `RelayConnection::ensure_connected` - dial + HTTP handshake if needed
//! 2. `RelayConnection::exchange` - one request/response, never pipelined
//! 3. Relay closes the idle keep-alive connection → next exchange redials
//! 4. `RelayConnection::release` - drop the sender, closing the stream
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `dialer` | [`Dialer`] trait, [`TcpDialer`], stream boxing |
//! | `relay_conn` | HTTP connection with transparent redial |

// ============================================================================
// Submodules
// ============================================================================

/// Pluggable relay dialers.
pub mod dialer;

/// HTTP/1.1 connection to the relay.
pub(crate) mod relay_conn;

// ============================================================================
// Re-exports
// ============================================================================

pub use dialer::{BoxedStream, Dialer, RelayStream, TcpDialer, boxed};
pub(crate) use relay_conn::RelayConnection;
