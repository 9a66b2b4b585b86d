//! HTTP/1.1 connection to the relay.
//!
//! Each session worker owns one [`RelayConnection`]. It carries exactly one
//! exchange at a time, redials transparently when the relay dropped the idle
//! keep-alive connection, and never retries an exchange that failed.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::{RelayPin, SessionToken};
use crate::protocol::{ExchangeRequest, ExchangeResponse, Op};

use super::dialer::Dialer;

// ============================================================================
// RelayConnection
// ============================================================================

/// One worker's connection to the relay.
pub(crate) struct RelayConnection {
    /// Caller-supplied dialer.
    dialer: Arc<dyn Dialer>,
    /// Session destination address.
    dest: String,
    /// Live HTTP sender, `None` until first dial or after release.
    sender: Option<SendRequest<Full<Bytes>>>,
    /// Session token once known.
    token: Option<SessionToken>,
    /// Relay pin once known.
    pin: Option<RelayPin>,
    /// Number of successful dials.
    dials: u64,
}

impl RelayConnection {
    /// Creates an unconnected relay connection.
    pub(crate) fn new(dialer: Arc<dyn Dialer>, dest: impl Into<String>) -> Self {
        Self {
            dialer,
            dest: dest.into(),
            sender: None,
            token: None,
            pin: None,
            dials: 0,
        }
    }

    /// Attaches the session identity learned from the first exchange.
    pub(crate) fn attach(&mut self, token: Option<SessionToken>, pin: Option<RelayPin>) {
        self.token = token;
        self.pin = pin;
    }

    /// Returns the session destination.
    #[inline]
    pub(crate) fn dest(&self) -> &str {
        &self.dest
    }

    /// Returns `true` if the current connection can carry another exchange.
    #[inline]
    pub(crate) fn is_usable(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Returns the number of times the relay was dialed.
    #[inline]
    pub(crate) fn dials(&self) -> u64 {
        self.dials
    }

    /// Dials the relay unless the current connection is still usable.
    ///
    /// # Errors
    ///
    /// - [`Error::RelayDial`] if the dialer fails
    /// - [`Error::Hyper`] if the HTTP handshake fails
    pub(crate) async fn ensure_connected(&mut self) -> Result<()> {
        if self.is_usable() {
            return Ok(());
        }
        if self.sender.take().is_some() {
            debug!(dest = %self.dest, "Relay connection unusable, redialing");
        }

        let stream = self
            .dialer
            .dial(&self.dest)
            .await
            .map_err(|e| Error::relay_dial(&self.dest, &e))?;

        let (sender, connection) = http1::handshake(TokioIo::new(stream)).await?;

        let dest = self.dest.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, %dest, "Relay connection ended with error");
            }
        });

        self.dials += 1;
        self.sender = Some(sender);
        trace!(dest = %self.dest, dials = self.dials, "Relay connection established");
        Ok(())
    }

    /// Performs one exchange.
    ///
    /// # Errors
    ///
    /// Any dial, transport or relay-reported error. The exchange is not
    /// retried.
    pub(crate) async fn exchange(
        &mut self,
        op: Op,
        seq: u64,
        body: Bytes,
    ) -> Result<ExchangeResponse> {
        self.ensure_connected().await?;

        let request = ExchangeRequest::new(op, seq, body)
            .with_token(self.token)
            .with_pin(self.pin.clone())
            .with_dest(self.dest.as_str())
            .into_http()?;

        let sender = self.sender.as_mut().ok_or(Error::ConnectionClosed)?;
        sender.ready().await?;
        let response = sender.send_request(request).await?;

        trace!(%op, seq, status = %response.status(), "Exchange completed");

        ExchangeResponse::read(response, &self.dest, self.token).await
    }

    /// Drops the HTTP sender, letting the connection task close the stream.
    pub(crate) fn release(&mut self) {
        self.sender = None;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;

    use crate::transport::BoxedStream;

    #[tokio::test]
    async fn test_dial_failure_maps_to_relay_dial() {
        let dialer: Arc<dyn Dialer> = Arc::new(|_dest: String| async move {
            Err::<BoxedStream, _>(io::Error::new(io::ErrorKind::ConnectionRefused, "nope"))
        });
        let mut conn = RelayConnection::new(dialer, "example.com:80");

        let err = conn
            .exchange(Op::Write, 0, Bytes::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RelayDial { ref addr, .. } if addr == "example.com:80"));
        assert!(!conn.is_usable());
        assert_eq!(conn.dials(), 0);
    }

    #[test]
    fn test_new_connection_is_not_usable() {
        let dialer: Arc<dyn Dialer> = Arc::new(|_dest: String| async move {
            Err::<BoxedStream, _>(io::Error::new(io::ErrorKind::Other, "unused"))
        });
        let conn = RelayConnection::new(dialer, "a:1");
        assert!(!conn.is_usable());
    }
}
