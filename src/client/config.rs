//! Client session configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use httptunnel::{Config, TcpDialer};
//!
//! let config = Config::new(TcpDialer::new("relay.internal:8080"))
//!     .with_idle_timeout(Duration::from_secs(10))
//!     .with_buffered_writes(true);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::Dialer;

// ============================================================================
// Constants
// ============================================================================

/// Default inactivity period before a session closes itself.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time buffered bytes wait for more writes before being sent.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(15);

// ============================================================================
// Config
// ============================================================================

/// Configuration for one tunnel session.
#[derive(Clone)]
pub struct Config {
    /// Opens byte streams to the relay.
    pub dialer: Option<Arc<dyn Dialer>>,

    /// Inactivity after which the session terminates itself.
    pub idle_timeout: Duration,

    /// Coalesce writes until flush, the buffer limit or the flush delay.
    pub buffered_writes: bool,

    /// In buffered mode, how long the first unsent byte may wait for more
    /// writes before it is sent without an explicit flush.
    pub flush_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialer: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            buffered_writes: false,
            flush_delay: DEFAULT_FLUSH_DELAY,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("dialer", &self.dialer.as_ref().map(|_| "<dialer>"))
            .field("idle_timeout", &self.idle_timeout)
            .field("buffered_writes", &self.buffered_writes)
            .field("flush_delay", &self.flush_delay)
            .finish()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl Config {
    /// Creates a configuration using `dialer` and default settings.
    #[must_use]
    pub fn new(dialer: impl Dialer) -> Self {
        Self::default().with_dialer(dialer)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl Config {
    /// Sets the relay dialer.
    #[inline]
    #[must_use]
    pub fn with_dialer(mut self, dialer: impl Dialer) -> Self {
        self.dialer = Some(Arc::new(dialer));
        self
    }

    /// Sets a dialer shared with other sessions.
    #[inline]
    #[must_use]
    pub fn with_shared_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Sets the idle timeout.
    #[inline]
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Enables or disables write coalescing.
    #[inline]
    #[must_use]
    pub fn with_buffered_writes(mut self, buffered: bool) -> Self {
        self.buffered_writes = buffered;
        self
    }

    /// Sets how long buffered bytes wait before being sent unflushed.
    #[inline]
    #[must_use]
    pub fn with_flush_delay(mut self, flush_delay: Duration) -> Self {
        self.flush_delay = flush_delay;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl Config {
    /// Validates the configuration, returning the dialer.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no dialer is set
    /// - [`Error::Config`] if the idle timeout is zero
    /// - [`Error::Config`] if the flush delay is not shorter than the idle
    ///   timeout
    pub fn validate(&self) -> Result<Arc<dyn Dialer>> {
        let dialer = self.dialer.clone().ok_or_else(|| {
            Error::config(
                "A relay dialer is required. Use Config::new() or .with_dialer() to set it.\n\
                 Example: Config::new(TcpDialer::new(\"relay:8080\"))",
            )
        })?;

        if self.idle_timeout.is_zero() {
            return Err(Error::config("Idle timeout must be greater than zero"));
        }

        if self.flush_delay >= self.idle_timeout {
            return Err(Error::config("Flush delay must be shorter than the idle timeout"));
        }

        Ok(dialer)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::TcpDialer;

    #[test]
    fn test_default_has_no_dialer() {
        let config = Config::default();
        assert!(config.dialer.is_none());
        assert_eq!(config.idle_timeout, DEFAULT_IDLE_TIMEOUT);
        assert!(!config.buffered_writes);
        assert_eq!(config.flush_delay, DEFAULT_FLUSH_DELAY);
    }

    #[test]
    fn test_builder_chain() {
        let config = Config::new(TcpDialer::new("127.0.0.1:1"))
            .with_idle_timeout(Duration::from_millis(250))
            .with_buffered_writes(true)
            .with_flush_delay(Duration::from_millis(5));

        assert!(config.dialer.is_some());
        assert_eq!(config.flush_delay, Duration::from_millis(5));
        assert_eq!(config.idle_timeout, Duration::from_millis(250));
        assert!(config.buffered_writes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_dialer() {
        let err = Config::default().validate().err().unwrap();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("dialer"));
    }

    #[test]
    fn test_validate_rejects_zero_idle() {
        let config = Config::new(TcpDialer::new("127.0.0.1:1")).with_idle_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_flush_delay_past_idle() {
        let config = Config::new(TcpDialer::new("127.0.0.1:1"))
            .with_idle_timeout(Duration::from_millis(10))
            .with_flush_delay(Duration::from_millis(10));
        let err = config.validate().err().unwrap();
        assert!(err.to_string().contains("Flush delay"));
    }

    #[test]
    fn test_debug_hides_dialer() {
        let config = Config::new(TcpDialer::new("127.0.0.1:1"));
        let debug = format!("{config:?}");
        assert!(debug.contains("<dialer>"));
        assert!(debug.contains("idle_timeout"));
    }
}
