//! Wire format for tunnel exchanges.
//!
//! Every exchange is one HTTP/1.1 `POST /` request and its response.
//! The stream fragment travels in the body; session bookkeeping travels in
//! headers.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`ExchangeRequest`] | Client → Relay | Write a fragment, or poll for one |
//! | [`ExchangeResponse`] | Relay → Client | Acknowledge a write, or carry polled bytes |
//! | [`ErrorBody`] | Relay → Client | JSON body of a non-200 response |
//!
//! # Headers
//!
//! | Header | Direction | Meaning |
//! |--------|-----------|---------|
//! | `x-tunnel-op` | request | `write` or `read` |
//! | `x-tunnel-session` | both | session token, absent on the first request |
//! | `x-tunnel-dest` | request | destination address, first request only |
//! | `x-tunnel-pin` | both | relay instance holding the session |
//! | `x-tunnel-seq` | request | per-direction sequence number |
//! | `x-tunnel-status` | response | `data` or `eof` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `headers` | Header names, [`Op`] and [`ExchangeStatus`] |
//! | `request` | [`ExchangeRequest`] encoding and parsing |
//! | `response` | [`ExchangeResponse`] and [`ErrorBody`] |

// ============================================================================
// Submodules
// ============================================================================

/// Header names and tags.
pub mod headers;

/// Exchange request message.
pub mod request;

/// Exchange response message and error bodies.
pub mod response;

// ============================================================================
// Re-exports
// ============================================================================

pub use headers::{ExchangeStatus, Op};
pub use request::ExchangeRequest;
pub use response::{ErrorBody, ErrorCode, ExchangeResponse};
