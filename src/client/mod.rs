//! Client side of the tunnel.
//!
//! A session is one [`Conn`] plus two background workers, one per direction:
//!
//! ```text
//!   write ──► OutboundHandle ──► OutboundWorker ──► `write` exchanges ──┐
//!                                                                       ▼
//!                                                                     Relay
//!                                                                       │
//!   read  ◄── mpsc::Receiver ◄── InboundWorker ◄── `read` exchanges ◄───┘
//! ```
//!
//! Each worker owns its relay connection and carries one exchange at a time,
//! which keeps each direction ordered without relying on the network path.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | [`Config`] |
//! | `conn` | [`dial`], [`Conn`], [`CloseHandle`] |
//! | `state` | Shared lifecycle and idle bookkeeping |
//! | `outbound` | Write path worker |
//! | `inbound` | Read path worker |

// ============================================================================
// Submodules
// ============================================================================

/// Client configuration.
pub mod config;

/// Duplex adapter and `dial`.
pub mod conn;

/// Read path worker.
pub(crate) mod inbound;

/// Write path worker.
pub(crate) mod outbound;

/// Shared session state.
pub(crate) mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{Config, DEFAULT_FLUSH_DELAY, DEFAULT_IDLE_TIMEOUT};
pub use conn::{CLOSE_TIMEOUT, CloseHandle, Conn, MAX_BUFFERED_BYTES, dial};
pub use state::Lifecycle;
