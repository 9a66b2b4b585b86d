//! Type-safe identifiers for tunnel sessions.
//!
//! Newtype wrappers keep the relay-minted session token and the relay
//! instance pin from being mixed up with each other or with raw strings.
//!
//! | Type | Minted by | Purpose |
//! |------|-----------|---------|
//! | [`SessionToken`] | Relay, first exchange | Selects the session-table entry |
//! | [`RelayPin`] | Relay configuration | Routes later exchanges to the same relay instance |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// SessionToken
// ============================================================================

/// Opaque token identifying one session on the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(Uuid);

impl SessionToken {
    /// Generates a new random token.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::protocol(format!("Invalid session token {s:?}: {e}")))
    }
}

// ============================================================================
// RelayPin
// ============================================================================

/// Name of the relay instance holding a session's destination connection.
///
/// Cheap to clone; immutable once learned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayPin(Arc<str>);

impl RelayPin {
    /// Creates a pin from a string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the pin is empty or is not a valid
    /// header value.
    pub fn new(pin: impl AsRef<str>) -> Result<Self> {
        let pin = pin.as_ref().trim();
        if pin.is_empty() {
            return Err(Error::protocol("Relay pin must not be empty"));
        }
        if http::HeaderValue::from_str(pin).is_err() {
            return Err(Error::protocol(format!(
                "Relay pin {pin:?} is not a valid header value"
            )));
        }
        Ok(Self(Arc::from(pin)))
    }

    /// Returns the pin as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
