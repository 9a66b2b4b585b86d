//! Relay tuning options.
//!
//! Options can be built in code or loaded from JSON. Durations are written
//! in milliseconds:
//!
//! ```json
//! {
//!   "poll_timeout_ms": 2000,
//!   "idle_timeout_ms": 60000,
//!   "sweep_interval_ms": 5000,
//!   "dial_timeout_ms": 10000,
//!   "pin": "relay-a.internal:8080"
//! }
//! ```
//!
//! Missing fields take their defaults.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::RelayPin;

// ============================================================================
// Constants
// ============================================================================

/// How long a poll waits for destination data before answering empty.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(2);

/// Inactivity after which a session entry is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How often the sweep looks for idle entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Bound on dialing a destination.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// RelayOptions
// ============================================================================

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayOptions {
    /// Long-poll deadline.
    #[serde(rename = "poll_timeout_ms", with = "millis")]
    pub poll_timeout: Duration,

    /// Entry idle threshold.
    #[serde(rename = "idle_timeout_ms", with = "millis")]
    pub idle_timeout: Duration,

    /// Sweep period.
    #[serde(rename = "sweep_interval_ms", with = "millis")]
    pub sweep_interval: Duration,

    /// Destination dial bound.
    #[serde(rename = "dial_timeout_ms", with = "millis")]
    pub dial_timeout: Duration,

    /// Pin advertised to clients. Defaults to the listener address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl RelayOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            pin: None,
        }
    }

    /// Parses options from JSON.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the document is malformed
    /// - [`Error::Config`] if a value is out of range
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl RelayOptions {
    /// Sets the long-poll deadline.
    #[inline]
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the entry idle threshold.
    #[inline]
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the sweep period.
    #[inline]
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the destination dial bound.
    #[inline]
    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the advertised pin.
    #[inline]
    #[must_use]
    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl RelayOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a duration is zero or the pin is not a
    /// valid header value.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("poll_timeout", self.poll_timeout),
            ("idle_timeout", self.idle_timeout),
            ("sweep_interval", self.sweep_interval),
            ("dial_timeout", self.dial_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }

        if let Some(pin) = &self.pin {
            RelayPin::new(pin).map_err(|e| Error::config(format!("Invalid pin: {e}")))?;
        }

        Ok(())
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = RelayOptions::default();
        assert_eq!(options.poll_timeout, DEFAULT_POLL_TIMEOUT);
        assert_eq!(options.idle_timeout, DEFAULT_IDLE_TIMEOUT);
        assert!(options.pin.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let options =
            RelayOptions::from_json(r#"{"poll_timeout_ms": 250, "pin": "relay-a"}"#).expect("parse");

        assert_eq!(options.poll_timeout, Duration::from_millis(250));
        assert_eq!(options.idle_timeout, DEFAULT_IDLE_TIMEOUT);
        assert_eq!(options.pin.as_deref(), Some("relay-a"));
    }

    #[test]
    fn test_from_json_rejects_zero() {
        let err = RelayOptions::from_json(r#"{"sweep_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("sweep_interval"));
    }

    #[test]
    fn test_from_json_malformed() {
        let err = RelayOptions::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_serialize_uses_millis() {
        let options = RelayOptions::new().with_dial_timeout(Duration::from_millis(1500));
        let json = serde_json::to_value(&options).expect("serialize");

        assert_eq!(json["dial_timeout_ms"], 1500);
        assert!(json.get("pin").is_none());
    }

    #[test]
    fn test_validate_rejects_bad_pin() {
        let options = RelayOptions::new().with_pin("bad\npin");
        assert!(options.validate().is_err());
    }
}
