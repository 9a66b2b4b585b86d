//! Builder pattern for relay configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use httptunnel::Relay;
//!
//! # fn main() -> httptunnel::Result<()> {
//! let relay = Relay::builder()
//!     .poll_timeout(Duration::from_millis(500))
//!     .on_bytes_sent(|client, dest, _parts, n| {
//!         tracing::info!(%client, dest, n, "Forwarded");
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::request::Parts;

use crate::error::Result;

use super::dispatcher::Relay;
use super::options::RelayOptions;

// ============================================================================
// Types
// ============================================================================

/// Byte-count hook: client address, destination, request parts, byte count.
pub type ByteHook = Arc<dyn Fn(SocketAddr, &str, &Parts, usize) + Send + Sync>;

// ============================================================================
// RelayBuilder
// ============================================================================

/// Builder for a [`Relay`].
///
/// Use [`Relay::builder()`] to create one.
#[derive(Default, Clone)]
pub struct RelayBuilder {
    options: RelayOptions,
    on_bytes_received: Option<ByteHook>,
    on_bytes_sent: Option<ByteHook>,
}

impl RelayBuilder {
    /// Creates a builder with default options and no hooks.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: RelayOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the long-poll deadline.
    #[inline]
    #[must_use]
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.options.poll_timeout = timeout;
        self
    }

    /// Sets the idle threshold for session entries.
    #[inline]
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.options.idle_timeout = timeout;
        self
    }

    /// Sets the sweep period.
    #[inline]
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.options.sweep_interval = interval;
        self
    }

    /// Sets the advertised pin.
    #[inline]
    #[must_use]
    pub fn pin(mut self, pin: impl Into<String>) -> Self {
        self.options.pin = Some(pin.into());
        self
    }

    /// Called with the byte count of every non-empty poll, i.e. bytes read
    /// from the destination.
    #[must_use]
    pub fn on_bytes_received<F>(mut self, hook: F) -> Self
    where
        F: Fn(SocketAddr, &str, &Parts, usize) + Send + Sync + 'static,
    {
        self.on_bytes_received = Some(Arc::new(hook));
        self
    }

    /// Called with the byte count of every non-empty write, i.e. bytes
    /// written to the destination.
    #[must_use]
    pub fn on_bytes_sent<F>(mut self, hook: F) -> Self
    where
        F: Fn(SocketAddr, &str, &Parts, usize) + Send + Sync + 'static,
    {
        self.on_bytes_sent = Some(Arc::new(hook));
        self
    }

    /// Builds the relay.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the options are invalid.
    pub fn build(self) -> Result<Arc<Relay>> {
        self.options.validate()?;
        Ok(Arc::new(Relay::new(
            self.options,
            self.on_bytes_received,
            self.on_bytes_sent,
        )))
    }
}

impl fmt::Debug for RelayBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayBuilder")
            .field("options", &self.options)
            .field("on_bytes_received", &self.on_bytes_received.is_some())
            .field("on_bytes_sent", &self.on_bytes_sent.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_has_defaults() {
        let builder = RelayBuilder::new();
        assert_eq!(builder.options, RelayOptions::default());
        assert!(builder.on_bytes_received.is_none());
        assert!(builder.on_bytes_sent.is_none());
    }

    #[test]
    fn test_hooks_are_stored() {
        let builder = RelayBuilder::new()
            .on_bytes_received(|_, _, _, _| {})
            .on_bytes_sent(|_, _, _, _| {});
        assert!(builder.on_bytes_received.is_some());
        assert!(builder.on_bytes_sent.is_some());
    }

    #[test]
    fn test_build_validates_options() {
        let result = RelayBuilder::new().poll_timeout(Duration::ZERO).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_with_pin() {
        let relay = RelayBuilder::new().pin("relay-a").build().expect("build");
        assert_eq!(relay.pin().map(|p| p.as_str().to_string()), Some("relay-a".into()));
    }
}
