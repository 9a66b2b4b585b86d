//! Relay dispatcher.
//!
//! Accepts HTTP/1.1 connections, decodes each exchange, and applies it to
//! the session table.
//!
//! # Exchange Handling
//!
//! | Request | Outcome |
//! |---------|---------|
//! | no token | dial destination, mint token, then handle the op |
//! | unknown or dead token | `410 session_lost` |
//! | `write` | payload written to destination, empty `200` |
//! | `read` | long-poll: data, empty on deadline, or `eof` |
//!
//! Errors are answered with a JSON [`ErrorBody`].

// ============================================================================
// Imports
// ============================================================================

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use http::request::Parts;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RelayPin;
use crate::protocol::{ErrorBody, ExchangeRequest, ExchangeResponse, Op};

use super::builder::{ByteHook, RelayBuilder};
use super::options::RelayOptions;
use super::table::{ReadOutcome, SessionEntry, SessionStats, SessionTable};

// ============================================================================
// Constants
// ============================================================================

/// Accept timeout, bounding how long shutdown goes unnoticed.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Relay
// ============================================================================

/// Relay end of the tunnel.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use httptunnel::Relay;
/// use tokio::net::TcpListener;
///
/// # async fn run() -> httptunnel::Result<()> {
/// let relay = Relay::builder().build()?;
/// let listener = TcpListener::bind("0.0.0.0:8080").await?;
/// tokio::spawn(Arc::clone(&relay).serve(listener));
/// # Ok(())
/// # }
/// ```
pub struct Relay {
    options: RelayOptions,
    table: SessionTable,
    pin: OnceLock<RelayPin>,
    on_bytes_received: Option<ByteHook>,
    on_bytes_sent: Option<ByteHook>,
    /// Stops the accept loop.
    shutdown: AtomicBool,
    /// Tells connection tasks to finish their current exchange and close.
    closing: watch::Sender<bool>,
}

// ============================================================================
// Relay - Constructor
// ============================================================================

impl Relay {
    /// Returns a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> RelayBuilder {
        RelayBuilder::new()
    }

    pub(crate) fn new(
        options: RelayOptions,
        on_bytes_received: Option<ByteHook>,
        on_bytes_sent: Option<ByteHook>,
    ) -> Self {
        let pin = OnceLock::new();
        if let Some(configured) = options.pin.as_deref().and_then(|p| RelayPin::new(p).ok()) {
            let _ = pin.set(configured);
        }

        let (closing, _) = watch::channel(false);

        Self {
            options,
            table: SessionTable::new(),
            pin,
            on_bytes_received,
            on_bytes_sent,
            shutdown: AtomicBool::new(false),
            closing,
        }
    }
}

// ============================================================================
// Relay - Public API
// ============================================================================

impl Relay {
    /// Returns the pin advertised to clients, once known.
    #[inline]
    #[must_use]
    pub fn pin(&self) -> Option<&RelayPin> {
        self.pin.get()
    }

    /// Returns the relay options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Returns the number of live sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.table.len()
    }

    /// Returns a snapshot of every live session.
    #[must_use]
    pub fn session_stats(&self) -> Vec<SessionStats> {
        self.table.stats()
    }

    /// Serves exchanges on `listener` until [`shutdown`](Self::shutdown).
    ///
    /// If no pin was configured, the listener address becomes the pin.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the listener address cannot be read
    /// - [`Error::Protocol`] if that address is not a valid pin
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        if self.pin.get().is_none() {
            let _ = self.pin.set(RelayPin::new(local.to_string())?);
        }

        let sweeper = tokio::spawn(Arc::clone(&self).sweep_loop());

        info!(
            %local,
            pin = self.pin().map_or("", RelayPin::as_str),
            "Relay started"
        );

        self.accept_loop(listener).await;
        sweeper.abort();
        Ok(())
    }

    /// Stops accepting, lets open connections finish their current
    /// exchange, and drops every session.
    pub fn shutdown(&self) {
        info!("Relay shutting down");

        self.shutdown.store(true, Ordering::SeqCst);
        self.closing.send_replace(true);

        let dropped = self.table.clear();
        info!(sessions = dropped, "Relay shutdown complete");
    }
}

// ============================================================================
// Relay - Accept Loop
// ============================================================================

impl Relay {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            // Accept with timeout to allow checking shutdown flag
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let relay = Arc::clone(&self);
                    tokio::spawn(async move {
                        relay.handle_connection(stream, addr).await;
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut ticks = interval(self.options.sweep_interval);
        loop {
            ticks.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let evicted = self.table.sweep(self.options.idle_timeout);
            if evicted > 0 {
                debug!(evicted, remaining = self.table.len(), "Sweep evicted sessions");
            }
        }
    }

    /// Serves HTTP/1.1 exchanges on one client connection.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, client: SocketAddr) {
        trace!(%client, "New relay connection");
        let _ = stream.set_nodelay(true);

        let relay = Arc::clone(&self);
        let service = service_fn(move |request: Request<Incoming>| {
            let relay = Arc::clone(&relay);
            async move { Ok::<_, Infallible>(relay.dispatch(request, client).await) }
        });

        let connection = http1::Builder::new()
            .keep_alive(true)
            .serve_connection(TokioIo::new(stream), service);
        tokio::pin!(connection);

        let mut closing = self.closing.subscribe();
        let result = tokio::select! {
            result = connection.as_mut() => result,
            () = async { let _ = closing.wait_for(|closing| *closing).await; } => {
                connection.as_mut().graceful_shutdown();
                connection.await
            }
        };

        if let Err(e) = result {
            debug!(%client, error = %e, "Relay connection ended with error");
        }
    }
}

// ============================================================================
// Relay - Exchange Handling
// ============================================================================

impl Relay {
    /// Answers one exchange. Never fails: errors become error bodies.
    async fn dispatch(&self, request: Request<Incoming>, client: SocketAddr) -> Response<Full<Bytes>> {
        let (parts, body) = request.into_parts();

        let result = match body.collect().await {
            Ok(collected) => self.exchange(&parts, collected.to_bytes(), client).await,
            Err(e) => Err(Error::protocol(format!("Unable to read request body: {e}"))),
        };

        match result {
            Ok(response) => response.into_http(),
            Err(e) => {
                match &e {
                    Error::SessionLost { .. } | Error::Protocol { .. } | Error::OutOfOrder { .. } => {
                        debug!(%client, error = %e, "Exchange rejected");
                    }
                    _ => warn!(%client, error = %e, "Exchange failed"),
                }
                ErrorBody::from_error(&e).into_response()
            }
        }
    }

    async fn exchange(
        &self,
        parts: &Parts,
        body: Bytes,
        client: SocketAddr,
    ) -> Result<ExchangeResponse> {
        let request = ExchangeRequest::parse(parts, body)?;
        let pin = self
            .pin()
            .cloned()
            .ok_or_else(|| Error::config("Relay is not serving"))?;

        let entry = match request.token {
            Some(token) => self.table.get(token)?,
            None => {
                // Nothing is dialed for an exchange the new entry would reject.
                if request.seq != 0 {
                    return Err(Error::out_of_order(0, request.seq));
                }
                let dest = request
                    .dest
                    .as_deref()
                    .ok_or_else(|| Error::protocol("First exchange must name a destination"))?;
                let entry = SessionEntry::open(dest, client, self.options.dial_timeout).await?;
                self.table.insert(entry)
            }
        };
        entry.touch();

        let token = entry.token();
        let response = match request.op {
            Op::Write => {
                let written = match entry.write(request.seq, &request.body).await {
                    Ok(n) => n,
                    Err(e) => {
                        if entry.is_dead() {
                            self.table.remove(token);
                        }
                        return Err(e);
                    }
                };
                if written > 0
                    && let Some(hook) = &self.on_bytes_sent
                {
                    hook(client, entry.dest(), parts, written);
                }
                ExchangeResponse::data(Bytes::new())
            }
            Op::Read => match entry.read(request.seq, self.options.poll_timeout).await? {
                ReadOutcome::Data(data) => {
                    if let Some(hook) = &self.on_bytes_received {
                        hook(client, entry.dest(), parts, data.len());
                    }
                    ExchangeResponse::data(data)
                }
                ReadOutcome::Empty => ExchangeResponse::data(Bytes::new()),
                ReadOutcome::Eof => {
                    self.table.remove(token);
                    ExchangeResponse::eof()
                }
            },
        };

        Ok(response.with_session(token, pin))
    }
}

// ============================================================================
// Tests
// ============================================================================
