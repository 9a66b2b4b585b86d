//! Exchange request message.
//!
//! Built by the client workers, parsed by the relay dispatcher.
//!
//! # Format
//!
//! ```text
//! POST / HTTP/1.1
//! host: <pin, or destination on the first request>
//! x-tunnel-op: write
//! x-tunnel-seq: 0
//! x-tunnel-dest: example.com:80        (first request only)
//! x-tunnel-session: <uuid>             (after the first request)
//! x-tunnel-pin: <pin>                  (after the first request)
//!
//! <stream fragment>
//! ```

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST};
use http::request::Parts;
use http::{Method, Request};
use http_body_util::Full;

use crate::error::{Error, Result};
use crate::identifiers::{RelayPin, SessionToken};

use super::headers::{self, Op};

// ============================================================================
// ExchangeRequest
// ============================================================================

/// One client → relay exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    /// Requested operation.
    pub op: Op,

    /// Sequence number within the op's direction.
    pub seq: u64,

    /// Session token, `None` on the first exchange.
    pub token: Option<SessionToken>,

    /// Relay pin learned from the first exchange.
    pub pin: Option<RelayPin>,

    /// Destination address, carried while no token is known.
    pub dest: Option<String>,

    /// Stream fragment (empty for polls).
    pub body: Bytes,
}

impl ExchangeRequest {
    /// Creates a request with no session attached yet.
    #[inline]
    #[must_use]
    pub fn new(op: Op, seq: u64, body: Bytes) -> Self {
        Self {
            op,
            seq,
            token: None,
            pin: None,
            dest: None,
            body,
        }
    }

    /// Attaches the session token.
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: Option<SessionToken>) -> Self {
        self.token = token;
        self
    }

    /// Attaches the relay pin.
    #[inline]
    #[must_use]
    pub fn with_pin(mut self, pin: Option<RelayPin>) -> Self {
        self.pin = pin;
        self
    }

    /// Attaches the destination address.
    #[inline]
    #[must_use]
    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    /// Encodes the exchange as an HTTP request.
    ///
    /// The `Host` header carries the pin when known so a load balancer in
    /// front of several relays can route on it; otherwise the destination.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if neither token nor destination is set,
    /// or [`Error::Http`] if a header value is invalid.
    pub fn into_http(self) -> Result<Request<Full<Bytes>>> {
        if self.token.is_none() && self.dest.is_none() {
            return Err(Error::protocol(
                "Exchange needs a session token or a destination",
            ));
        }

        let host = self
            .pin
            .as_ref()
            .map(RelayPin::as_str)
            .or(self.dest.as_deref())
            .unwrap_or("relay");

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(HOST, host)
            .header(CONTENT_LENGTH, self.body.len())
            .header(headers::OP, self.op.as_str())
            .header(headers::SEQ, self.seq);

        if let Some(token) = self.token {
            builder = builder.header(headers::SESSION, token.to_string());
        }
        if let Some(pin) = &self.pin {
            builder = builder.header(headers::PIN, pin.as_str());
        }
        if self.token.is_none()
            && let Some(dest) = &self.dest
        {
            builder = builder.header(headers::DEST, dest.as_str());
        }

        Ok(builder.body(Full::new(self.body))?)
    }

    /// Parses an exchange from request parts and a collected body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the method, op, sequence number or
    /// token is invalid, or if a first exchange lacks a destination.
    pub fn parse(parts: &Parts, body: Bytes) -> Result<Self> {
        if parts.method != Method::POST {
            return Err(Error::protocol(format!(
                "Unsupported method: {}",
                parts.method
            )));
        }

        let op = headers::get(&parts.headers, headers::OP)
            .ok_or_else(|| Error::protocol("Missing x-tunnel-op header"))?
            .parse::<Op>()?;

        let seq = match headers::get(&parts.headers, headers::SEQ) {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| Error::protocol(format!("Invalid sequence number {raw:?}: {e}")))?,
            None => return Err(Error::protocol("Missing x-tunnel-seq header")),
        };

        let token = headers::get(&parts.headers, headers::SESSION)
            .map(str::parse::<SessionToken>)
            .transpose()?;

        let pin = headers::get(&parts.headers, headers::PIN)
            .map(RelayPin::new)
            .transpose()?;

        let dest = headers::get(&parts.headers, headers::DEST).map(str::to_string);
        if token.is_none() && dest.is_none() {
            return Err(Error::protocol(
                "First exchange must carry x-tunnel-dest",
            ));
        }

        Ok(Self {
            op,
            seq,
            token,
            pin,
            dest,
            body,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parts_of(request: Request<Full<Bytes>>) -> (Parts, Full<Bytes>) {
        request.into_parts()
    }

    #[test]
    fn test_first_request_carries_destination() {
        let request = ExchangeRequest::new(Op::Write, 0, Bytes::from_static(b"hi"))
            .with_dest("example.com:80")
            .into_http()
            .expect("encode");

        assert_eq!(request.headers()[HOST], "example.com:80");
        assert_eq!(request.headers()[headers::DEST], "example.com:80");
        assert_eq!(request.headers()[headers::OP], "write");
        assert_eq!(request.headers()[headers::SEQ], "0");
        assert!(request.headers().get(headers::SESSION).is_none());
    }

    #[test]
    fn test_pinned_request_routes_on_pin() {
        let token = SessionToken::generate();
        let pin = RelayPin::new("relay-7").expect("pin");
        let request = ExchangeRequest::new(Op::Read, 4, Bytes::new())
            .with_token(Some(token))
            .with_pin(Some(pin))
            .with_dest("example.com:80")
            .into_http()
            .expect("encode");

        assert_eq!(request.headers()[HOST], "relay-7");
        assert_eq!(request.headers()[headers::PIN], "relay-7");
        assert_eq!(request.headers()[headers::SESSION], token.to_string().as_str());
        assert!(request.headers().get(headers::DEST).is_none());
    }

    #[test]
    fn test_request_without_session_or_destination_fails() {
        let result = ExchangeRequest::new(Op::Write, 0, Bytes::new()).into_http();
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_encoded_request() {
        let token = SessionToken::generate();
        let original = ExchangeRequest::new(Op::Write, 9, Bytes::from_static(b"abc"))
            .with_token(Some(token));
        let (parts, _) = parts_of(original.clone().into_http().expect("encode"));

        let parsed = ExchangeRequest::parse(&parts, Bytes::from_static(b"abc")).expect("parse");
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_parse_rejects_missing_op() {
        let (parts, _) = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(headers::SEQ, "0")
            .header(headers::DEST, "a:1")
            .body(Full::new(Bytes::new()))
            .expect("build")
            .into_parts();

        let err = ExchangeRequest::parse(&parts, Bytes::new()).unwrap_err();
        assert!(err.to_string().contains("x-tunnel-op"));
    }

    #[test]
    fn test_parse_rejects_get() {
        let (parts, _) = Request::builder()
            .method(Method::GET)
            .uri("/")
            .body(Full::new(Bytes::new()))
            .expect("build")
            .into_parts();

        assert!(ExchangeRequest::parse(&parts, Bytes::new()).is_err());
    }

    #[test]
    fn test_parse_rejects_first_exchange_without_destination() {
        let (parts, _) = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(headers::OP, "read")
            .header(headers::SEQ, "0")
            .body(Full::new(Bytes::new()))
            .expect("build")
            .into_parts();

        let err = ExchangeRequest::parse(&parts, Bytes::new()).unwrap_err();
        assert!(err.to_string().contains("x-tunnel-dest"));
    }
}
