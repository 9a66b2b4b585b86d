//! Header names and the small enums carried in them.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use http::HeaderMap;

use crate::error::{Error, Result};

// ============================================================================
// Header Names
// ============================================================================

/// Operation tag header.
pub const OP: &str = "x-tunnel-op";

/// Session token header.
pub const SESSION: &str = "x-tunnel-session";

/// Destination address header.
pub const DEST: &str = "x-tunnel-dest";

/// Relay pin header.
pub const PIN: &str = "x-tunnel-pin";

/// Per-direction sequence number header.
pub const SEQ: &str = "x-tunnel-seq";

/// Response status header.
pub const STATUS: &str = "x-tunnel-status";

/// Returns a header's value as a trimmed string, if present and valid UTF-8.
pub(crate) fn get<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Op
// ============================================================================

/// Operation requested by an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Copy the request body to the destination.
    Write,

    /// Return bytes available from the destination.
    Read,
}

impl Op {
    /// Returns the wire representation.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Op {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "write" => Ok(Self::Write),
            "read" => Ok(Self::Read),
            other => Err(Error::protocol(format!("Unknown op: {other}"))),
        }
    }
}

// ============================================================================
// ExchangeStatus
// ============================================================================

/// Outcome of a successful exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeStatus {
    /// Normal payload (possibly empty).
    #[default]
    Data,

    /// The destination closed its side of the stream.
    Eof,
}

impl ExchangeStatus {
    /// Returns the wire representation.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Eof => "eof",
        }
    }
}

impl FromStr for ExchangeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "data" => Ok(Self::Data),
            "eof" => Ok(Self::Eof),
            other => Err(Error::protocol(format!("Unknown exchange status: {other}"))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use http::HeaderValue;

    #[test]
    fn test_op_round_trip() {
        assert_eq!("write".parse::<Op>().expect("parse"), Op::Write);
        assert_eq!("read".parse::<Op>().expect("parse"), Op::Read);
        assert_eq!(Op::Write.to_string(), "write");
    }

    #[test]
    fn test_op_rejects_unknown() {
        let err = "delete".parse::<Op>().unwrap_err();
        assert!(err.to_string().contains("delete"));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "eof".parse::<ExchangeStatus>().expect("parse"),
            ExchangeStatus::Eof
        );
        assert!("done".parse::<ExchangeStatus>().is_err());
        assert_eq!(ExchangeStatus::default(), ExchangeStatus::Data);
    }

    #[test]
    fn test_get_skips_blank_values() {
        let mut headers = HeaderMap::new();
        headers.insert(OP, HeaderValue::from_static(" write "));
        headers.insert(PIN, HeaderValue::from_static("  "));

        assert_eq!(get(&headers, OP), Some("write"));
        assert_eq!(get(&headers, PIN), None);
        assert_eq!(get(&headers, SESSION), None);
    }
}
