//! Exchange response message and error bodies.
//!
//! # Format
//!
//! Success:
//! ```text
//! HTTP/1.1 200 OK
//! x-tunnel-status: data | eof
//! x-tunnel-session: <uuid>
//! x-tunnel-pin: <pin>
//!
//! <bytes read from the destination, empty for writes>
//! ```
//!
//! Error:
//! ```json
//! {
//!   "code": "session_lost",
//!   "message": "Session lost: 550e8400-e29b-41d4-a716-446655440000"
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::{RelayPin, SessionToken};

use super::headers::{self, ExchangeStatus};

/// Longest slice of a non-JSON error body kept in the error message.
const MAX_ERROR_TEXT: usize = 256;

// ============================================================================
// ExchangeResponse
// ============================================================================

/// One relay → client answer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExchangeResponse {
    /// Whether the body is data or the destination reached end-of-stream.
    pub status: ExchangeStatus,

    /// Session token, always echoed by the relay.
    pub token: Option<SessionToken>,

    /// Relay pin, always echoed by the relay.
    pub pin: Option<RelayPin>,

    /// Bytes read from the destination.
    pub body: Bytes,
}

impl ExchangeResponse {
    /// Creates a data response.
    #[inline]
    #[must_use]
    pub fn data(body: Bytes) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    /// Creates an end-of-stream response.
    #[inline]
    #[must_use]
    pub fn eof() -> Self {
        Self {
            status: ExchangeStatus::Eof,
            ..Self::default()
        }
    }

    /// Attaches session identity headers.
    #[inline]
    #[must_use]
    pub fn with_session(mut self, token: SessionToken, pin: RelayPin) -> Self {
        self.token = Some(token);
        self.pin = Some(pin);
        self
    }

    /// Returns `true` if this response reports end-of-stream.
    #[inline]
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.status == ExchangeStatus::Eof
    }

    /// Encodes the response for the relay side.
    #[must_use]
    pub fn into_http(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body));
        let map = response.headers_mut();

        map.insert(
            headers::STATUS,
            HeaderValue::from_static(self.status.as_str()),
        );
        if let Some(token) = self.token
            && let Ok(value) = HeaderValue::from_str(&token.to_string())
        {
            map.insert(headers::SESSION, value);
        }
        if let Some(pin) = self.pin
            && let Ok(value) = HeaderValue::from_str(pin.as_str())
        {
            map.insert(headers::PIN, value);
        }

        response
    }

    /// Reads and decodes a relay response on the client side.
    ///
    /// # Arguments
    ///
    /// * `response` - Response returned by the relay connection
    /// * `dest` - Destination address, used for error context
    /// * `token` - Session token if known, used for error context
    ///
    /// # Errors
    ///
    /// - [`Error::Hyper`] if the body cannot be read
    /// - The error reported by the relay for non-200 statuses
    pub async fn read(
        response: Response<Incoming>,
        dest: &str,
        token: Option<SessionToken>,
    ) -> Result<Self> {
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        Self::decode(parts.status, &parts.headers, body, dest, token)
    }

    /// Decodes a collected relay response.
    ///
    /// # Errors
    ///
    /// Returns the relay-reported error for non-200 statuses, or
    /// [`Error::Protocol`] for malformed identity headers.
    pub fn decode(
        status: StatusCode,
        map: &HeaderMap,
        body: Bytes,
        dest: &str,
        token: Option<SessionToken>,
    ) -> Result<Self> {
        if status != StatusCode::OK {
            return Err(ErrorBody::decode(status, &body).into_error(status, dest, token));
        }

        let exchange_status = headers::get(map, headers::STATUS)
            .map(str::parse::<ExchangeStatus>)
            .transpose()?
            .unwrap_or_default();

        let token = headers::get(map, headers::SESSION)
            .map(str::parse::<SessionToken>)
            .transpose()?;

        let pin = headers::get(map, headers::PIN)
            .map(RelayPin::new)
            .transpose()?;

        Ok(Self {
            status: exchange_status,
            token,
            pin,
            body,
        })
    }
}

// ============================================================================
// ErrorCode
// ============================================================================

/// Machine-readable error code carried in [`ErrorBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The exchange was malformed.
    BadRequest,

    /// The token is unknown or its destination connection is gone.
    SessionLost,

    /// The sequence number did not match the next expected one.
    OutOfOrder,

    /// The relay could not reach the destination.
    DialFailed,

    /// Writing to the destination failed.
    WriteFailed,

    /// Anything else.
    Internal,
}

impl ErrorCode {
    /// Returns the HTTP status used for this code.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::SessionLost => StatusCode::GONE,
            Self::OutOfOrder => StatusCode::CONFLICT,
            Self::DialFailed | Self::WriteFailed => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// ErrorBody
// ============================================================================

/// JSON body of a failed exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code.
    pub code: ErrorCode,

    /// Human-readable message.
    pub message: String,

    /// Expected sequence number, for [`ErrorCode::OutOfOrder`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<u64>,

    /// Received sequence number, for [`ErrorCode::OutOfOrder`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<u64>,
}

impl ErrorBody {
    /// Builds the body the relay sends for an error.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        let (code, expected, actual) = match err {
            Error::Protocol { .. } | Error::Json(_) => (ErrorCode::BadRequest, None, None),
            Error::SessionLost { .. } => (ErrorCode::SessionLost, None, None),
            Error::OutOfOrder { expected, actual } => {
                (ErrorCode::OutOfOrder, Some(*expected), Some(*actual))
            }
            Error::DestinationUnreachable { .. } => (ErrorCode::DialFailed, None, None),
            Error::WriteFailed { .. } | Error::Io(_) => (ErrorCode::WriteFailed, None, None),
            _ => (ErrorCode::Internal, None, None),
        };

        Self {
            code,
            message: err.to_string(),
            expected,
            actual,
        }
    }

    /// Encodes the error as an HTTP response.
    #[must_use]
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = self.code.status();
        let body = serde_json::to_vec(&self).unwrap_or_else(|_| self.message.into_bytes());

        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    /// Decodes an error body, tolerating non-JSON bodies from intermediaries.
    #[must_use]
    pub fn decode(status: StatusCode, body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_else(|_| {
            let text = String::from_utf8_lossy(&body[..body.len().min(MAX_ERROR_TEXT)]);
            let message = if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown").to_string()
            } else {
                text.trim().to_string()
            };
            Self {
                code: ErrorCode::Internal,
                message,
                expected: None,
                actual: None,
            }
        })
    }

    /// Converts the body into a client-side error.
    #[must_use]
    pub fn into_error(self, status: StatusCode, dest: &str, token: Option<SessionToken>) -> Error {
        match self.code {
            ErrorCode::BadRequest => Error::protocol(self.message),
            ErrorCode::SessionLost => match token {
                Some(token) => Error::session_lost(token),
                None => Error::relay(status.as_u16(), self.message),
            },
            ErrorCode::OutOfOrder => Error::out_of_order(
                self.expected.unwrap_or_default(),
                self.actual.unwrap_or_default(),
            ),
            ErrorCode::DialFailed => Error::destination_unreachable(dest, self.message),
            ErrorCode::WriteFailed => Error::write_failed(self.message),
            ErrorCode::Internal => Error::relay(status.as_u16(), self.message),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_response_headers() {
        let token = SessionToken::generate();
        let pin = RelayPin::new("relay-1").expect("pin");
        let response = ExchangeResponse::data(Bytes::from_static(b"xyz"))
            .with_session(token, pin)
            .into_http();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[headers::STATUS], "data");
        assert_eq!(response.headers()[headers::PIN], "relay-1");
    }

    #[test]
    fn test_decode_success() {
        let token = SessionToken::generate();
        let mut map = HeaderMap::new();
        map.insert(headers::STATUS, HeaderValue::from_static("eof"));
        map.insert(
            headers::SESSION,
            HeaderValue::from_str(&token.to_string()).expect("value"),
        );
        map.insert(headers::PIN, HeaderValue::from_static("relay-2"));

        let decoded =
            ExchangeResponse::decode(StatusCode::OK, &map, Bytes::new(), "a:1", None)
                .expect("decode");

        assert!(decoded.is_eof());
        assert_eq!(decoded.token, Some(token));
        assert_eq!(decoded.pin.as_ref().map(RelayPin::as_str), Some("relay-2"));
    }

    #[test]
    fn test_missing_status_means_data() {
        let decoded = ExchangeResponse::decode(
            StatusCode::OK,
            &HeaderMap::new(),
            Bytes::from_static(b"abc"),
            "a:1",
            None,
        )
        .expect("decode");

        assert_eq!(decoded.status, ExchangeStatus::Data);
        assert_eq!(decoded.body, Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_session_lost_maps_to_fatal_error() {
        let token = SessionToken::generate();
        let body = ErrorBody::from_error(&Error::session_lost(token));
        assert_eq!(body.code, ErrorCode::SessionLost);

        let bytes = serde_json::to_vec(&body).expect("encode");
        let err = ExchangeResponse::decode(
            StatusCode::GONE,
            &HeaderMap::new(),
            Bytes::from(bytes),
            "a:1",
            Some(token),
        )
        .unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(err, Error::SessionLost { token: t } if t == token));
    }

    #[test]
    fn test_dial_failed_maps_to_destination_unreachable() {
        let body = ErrorBody::from_error(&Error::destination_unreachable("b:2", "refused"));
        let response = body.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let err = ErrorBody::from_error(&Error::destination_unreachable("b:2", "refused"))
            .into_error(StatusCode::BAD_GATEWAY, "b:2", None);
        assert!(matches!(err, Error::DestinationUnreachable { ref addr, .. } if addr == "b:2"));
    }

    #[test]
    fn test_out_of_order_keeps_sequence_numbers() {
        let body = ErrorBody::from_error(&Error::out_of_order(2, 5));
        let json = serde_json::to_string(&body).expect("encode");
        assert!(json.contains("\"expected\":2"));

        let err = body.into_error(StatusCode::CONFLICT, "a:1", None);
        assert!(matches!(err, Error::OutOfOrder { expected: 2, actual: 5 }));
    }

    #[test]
    fn test_non_json_error_body() {
        let body = ErrorBody::decode(StatusCode::SERVICE_UNAVAILABLE, b"<html>busy</html>");
        assert_eq!(body.code, ErrorCode::Internal);

        let err = body.into_error(StatusCode::SERVICE_UNAVAILABLE, "a:1", None);
        assert!(matches!(err, Error::Relay { status: 503, .. }));
    }

    #[test]
    fn test_empty_error_body_uses_reason() {
        let body = ErrorBody::decode(StatusCode::BAD_GATEWAY, b"");
        assert_eq!(body.message, "Bad Gateway");
    }
}
