//! Relay side of the tunnel.
//!
//! The relay terminates exchanges from clients and holds one destination
//! connection per session.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  POST /  ┌──────────────────────────────┐  TCP  ┌─────────────┐
//! │  Client  │─────────►│ Relay                        │──────►│ Destination │
//! │ workers  │◄─────────│  dispatcher → SessionTable   │◄──────│             │
//! └──────────┘          └──────────────────────────────┘       └─────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`RelayBuilder`] and telemetry hooks |
//! | `dispatcher` | [`Relay`]: accept loop and exchange handling |
//! | `options` | [`RelayOptions`], loadable from JSON |
//! | `table` | [`SessionTable`] and idle sweep |

// ============================================================================
// Submodules
// ============================================================================

/// Relay builder and hooks.
pub mod builder;

/// Accept loop and exchange handling.
pub mod dispatcher;

/// Relay options.
pub mod options;

/// Session table.
pub mod table;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{ByteHook, RelayBuilder};
pub use dispatcher::Relay;
pub use options::RelayOptions;
pub use table::{ReadOutcome, SessionEntry, SessionStats, SessionTable};
