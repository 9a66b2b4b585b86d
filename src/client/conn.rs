//! The duplex adapter.
//!
//! [`Conn`] turns a session's two workers back into one byte stream. Writes
//! become queued items acknowledged by the outbound worker; reads drain the
//! inbound worker's channel.
//!
//! # Example
//!
//! ```no_run
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//! use httptunnel::{Config, TcpDialer};
//!
//! # async fn run() -> httptunnel::Result<()> {
//! let mut conn = httptunnel::dial("example.com:80", Config::new(TcpDialer::new("relay:8080"))).await?;
//! conn.write_all(b"GET / HTTP/1.0\r\n\r\n").await?;
//!
//! let mut response = Vec::new();
//! conn.read_to_end(&mut response).await?;
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep, sleep, timeout};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RelayPin, SessionToken};
use crate::transport::RelayConnection;

use super::config::Config;
use super::inbound::{InboundItem, InboundWorker};
use super::outbound::{OutboundHandle, OutboundWorker};
use super::state::{Lifecycle, SessionState};

// ============================================================================
// Constants
// ============================================================================

/// Write buffer limit in buffered mode.
pub const MAX_BUFFERED_BYTES: usize = 64 * 1024;

/// How long `close` waits for the workers before aborting them.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// dial
// ============================================================================

/// Opens a tunnel session to `addr` through the relay reached by
/// `config.dialer`.
///
/// Performs the first exchange before returning, so relay and destination
/// failures surface here.
///
/// # Errors
///
/// - [`Error::Config`] if the configuration or address is invalid
/// - [`Error::RelayDial`] if the dialer fails
/// - [`Error::DestinationUnreachable`] if the relay cannot reach `addr`
/// - Any transport or protocol error from the first exchange
pub async fn dial(addr: impl Into<String>, config: Config) -> Result<Conn> {
    let dialer = config.validate()?;
    let dest = addr.into();
    if dest.trim().is_empty() {
        return Err(Error::config("Destination address must not be empty"));
    }

    let state = SessionState::new();

    let (outbound, initial, outbound_task) = OutboundWorker::spawn(
        RelayConnection::new(Arc::clone(&dialer), dest.as_str()),
        Arc::clone(&state),
        config.idle_timeout,
    );

    // The first item carries no payload; it only opens the session.
    let (ack, _first_ack) = oneshot::channel();
    outbound.submit(Bytes::new(), ack)?;

    let initial = match initial.await {
        Ok(Ok(initial)) => initial,
        Ok(Err(e)) => {
            debug!(%dest, error = %e, "Session setup failed");
            state.mark_closed();
            return Err(e);
        }
        Err(_) => {
            state.mark_closed();
            return Err(Error::AbnormalTermination);
        }
    };

    let token = initial.token;
    let pin = initial.pin.clone();

    let mut relay = RelayConnection::new(dialer, dest.as_str());
    relay.attach(Some(token), pin.clone());
    let (inbound, inbound_task) = InboundWorker::spawn(relay, Arc::clone(&state), initial);

    debug!(
        %dest,
        %token,
        pin = pin.as_ref().map_or("", RelayPin::as_str),
        buffered = config.buffered_writes,
        "Session established"
    );

    Ok(Conn {
        dest,
        token,
        pin,
        outbound,
        inbound,
        read_buf: Bytes::new(),
        read_state: ReadState::Open,
        pending: None,
        write_buf: BytesMut::new(),
        buffered: config.buffered_writes,
        flush_delay: config.flush_delay,
        flush_timer: None,
        deferred: None,
        heartbeat_every: config.idle_timeout / 4,
        read_heartbeat: None,
        write_closed: false,
        closer: CloseHandle {
            state,
            workers: Arc::new(Mutex::new(vec![outbound_task, inbound_task])),
        },
    })
}

// ============================================================================
// Conn
// ============================================================================

/// Read side progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Open,
    Eof,
    Failed,
}

/// A write waiting for its exchange.
struct PendingWrite {
    done: oneshot::Receiver<Result<()>>,
    len: usize,
}

/// A tunneled connection.
///
/// Implements [`AsyncRead`] and [`AsyncWrite`]. A write completes once the
/// relay has written its bytes to the destination. Dropping the `Conn`
/// starts closing the session without waiting for it.
pub struct Conn {
    dest: String,
    token: SessionToken,
    pin: Option<RelayPin>,
    outbound: OutboundHandle,
    inbound: mpsc::Receiver<InboundItem>,
    /// Unread remainder of the last chunk.
    read_buf: Bytes,
    read_state: ReadState,
    pending: Option<PendingWrite>,
    /// Coalesced writes, buffered mode only.
    write_buf: BytesMut,
    buffered: bool,
    flush_delay: Duration,
    /// Armed when `write_buf` stops being empty.
    flush_timer: Option<Pin<Box<Sleep>>>,
    /// Completion of the latest send started by the read path. Only the
    /// write path polls it.
    deferred: Option<oneshot::Receiver<Result<()>>>,
    heartbeat_every: Duration,
    /// Re-polls a parked read so it keeps counting as pending.
    read_heartbeat: Option<Pin<Box<Sleep>>>,
    write_closed: bool,
    closer: CloseHandle,
}

impl Conn {
    /// Returns the destination address.
    #[inline]
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.dest
    }

    /// Returns the session token assigned by the relay.
    #[inline]
    #[must_use]
    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// Returns the relay pin, if the relay sent one.
    #[inline]
    #[must_use]
    pub fn pin(&self) -> Option<&RelayPin> {
        self.pin.as_ref()
    }

    /// Returns `true` once the session started closing.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Returns a handle that can close this session from another task.
    #[must_use]
    pub fn close_handle(&self) -> CloseHandle {
        self.closer.clone()
    }

    /// Flushes buffered writes, then closes the session.
    ///
    /// Idempotent. In-flight operations on other tasks fail with
    /// [`Error::ConnectionClosed`].
    ///
    /// # Errors
    ///
    /// The flush error, if flushing buffered writes failed. The session is
    /// closed either way.
    pub async fn close(&mut self) -> Result<()> {
        let flushed = if self.closer.state.lifecycle() == Lifecycle::Open && self.has_unflushed() {
            self.flush().await
        } else {
            Ok(())
        };

        self.closer.close().await;
        flushed.map_err(Error::from)
    }

    fn has_unflushed(&self) -> bool {
        !self.write_buf.is_empty() || self.pending.is_some() || self.deferred.is_some()
    }

    // ------------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------------

    /// Queues `payload` as one exchange.
    fn submit(&mut self, payload: Bytes) -> io::Result<()> {
        let len = payload.len();
        let (ack, done) = oneshot::channel();
        self.outbound.submit(payload, ack)?;
        self.pending = Some(PendingWrite { done, len });
        Ok(())
    }

    /// Waits for the queued exchange, returning its length.
    fn poll_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        let Some(pending) = self.pending.as_mut() else {
            return Poll::Ready(Ok(0));
        };

        let result = ready!(Pin::new(&mut pending.done).poll(cx));
        let len = pending.len;
        self.pending = None;

        Poll::Ready(match result {
            Ok(Ok(())) => Ok(len),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(Error::ConnectionClosed.into()),
        })
    }

    /// Sends the write buffer and waits for it, and for any send the read
    /// path started.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            if self.pending.is_some() {
                ready!(self.poll_pending(cx))?;
                continue;
            }
            if !self.write_buf.is_empty() {
                self.flush_timer = None;
                let payload = self.write_buf.split().freeze();
                self.submit(payload)?;
                continue;
            }
            let Some(deferred) = self.deferred.as_mut() else {
                return Poll::Ready(Ok(()));
            };
            let result = ready!(Pin::new(deferred).poll(cx));
            self.deferred = None;
            return Poll::Ready(match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(Error::ConnectionClosed.into()),
            });
        }
    }

    /// Sends buffered bytes that waited `flush_delay`, without waiting for
    /// the exchange.
    ///
    /// Called from the read path. The queue keeps these bytes ordered after
    /// any write in flight, so the writer's completion is left alone.
    fn poll_deferred_flush(&mut self, cx: &mut Context<'_>) {
        if !self.buffered || self.write_buf.is_empty() {
            return;
        }
        let Some(timer) = self.flush_timer.as_mut() else {
            return;
        };
        if timer.as_mut().poll(cx).is_pending() {
            return;
        }

        self.flush_timer = None;
        let payload = self.write_buf.split().freeze();
        let (ack, done) = oneshot::channel();
        match self.outbound.submit(payload, ack) {
            Ok(()) => self.deferred = Some(done),
            // The session is closing; the read side reports how it ended.
            Err(e) => debug!(dest = %self.dest, error = %e, "Deferred flush rejected"),
        }
    }

    /// Buffers `buf` in buffered mode, sending first if the buffer is full
    /// or overdue.
    fn poll_buffer(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let overdue = self.flush_timer.as_ref().is_some_and(|t| t.is_elapsed());
        let full = !self.write_buf.is_empty() && self.write_buf.len() + buf.len() > MAX_BUFFERED_BYTES;
        if overdue || full {
            ready!(self.poll_drain(cx))?;
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if self.write_buf.is_empty() {
            self.flush_timer = Some(Box::pin(sleep(self.flush_delay)));
        }
        let n = buf.len().min(MAX_BUFFERED_BYTES - self.write_buf.len());
        self.write_buf.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    // ------------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------------

    fn copy_out(&mut self, buf: &mut ReadBuf<'_>) {
        let n = self.read_buf.len().min(buf.remaining());
        buf.put_slice(&self.read_buf.split_to(n));
    }

    /// Marks the read as parked and schedules the next refresh.
    fn park_read(&mut self, cx: &mut Context<'_>) {
        self.closer.state.mark_reading();

        let every = self.heartbeat_every;
        let heartbeat = self
            .read_heartbeat
            .get_or_insert_with(|| Box::pin(sleep(every)));
        if heartbeat.as_mut().poll(cx).is_ready() {
            heartbeat.as_mut().reset(Instant::now() + every);
            let _ = heartbeat.as_mut().poll(cx);
        }
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("dest", &self.dest)
            .field("token", &self.token)
            .field("pin", &self.pin)
            .field("buffered", &self.buffered)
            .field("lifecycle", &self.closer.state.lifecycle())
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.read_buf.is_empty() {
                this.copy_out(buf);
                return Poll::Ready(Ok(()));
            }

            match this.read_state {
                ReadState::Open => {}
                ReadState::Eof => return Poll::Ready(Ok(())),
                ReadState::Failed => return Poll::Ready(Err(Error::ConnectionClosed.into())),
            }

            let item = match this.inbound.poll_recv(cx) {
                Poll::Pending => {
                    this.park_read(cx);
                    // Buffered bytes may be what the destination is waiting for.
                    this.poll_deferred_flush(cx);
                    return Poll::Pending;
                }
                Poll::Ready(item) => item,
            };
            this.closer.state.clear_reading();

            match item {
                Some(InboundItem::Data(data)) => this.read_buf = data,
                Some(InboundItem::Eof) => this.read_state = ReadState::Eof,
                Some(InboundItem::Failed(e)) => {
                    this.read_state = ReadState::Failed;
                    return Poll::Ready(Err(e.into()));
                }
                None => {
                    if this.closer.state.has_failed() {
                        this.read_state = ReadState::Failed;
                        return Poll::Ready(Err(Error::AbnormalTermination.into()));
                    }
                    this.read_state = ReadState::Eof;
                }
            }
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.write_closed {
            return Poll::Ready(Err(Error::ConnectionClosed.into()));
        }

        if this.buffered {
            return this.poll_buffer(cx, buf);
        }

        // A pending write belongs to the same buffer the caller retries with.
        if this.pending.is_none() {
            if buf.is_empty() {
                return Poll::Ready(Ok(0));
            }
            this.submit(Bytes::copy_from_slice(buf))?;
        }
        this.poll_pending(cx)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_drain(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.write_closed {
            ready!(this.poll_drain(cx))?;
            this.write_closed = true;
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if self.closer.state.begin_close() {
            debug!(dest = %self.dest, token = %self.token, "Conn dropped, closing session");
        }
    }
}

// ============================================================================
// CloseHandle
// ============================================================================

/// Closes a session from any task.
#[derive(Clone)]
pub struct CloseHandle {
    state: Arc<SessionState>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl CloseHandle {
    /// Closes the session and waits for its workers.
    ///
    /// Workers still running after [`CLOSE_TIMEOUT`] are aborted.
    pub async fn close(&self) {
        self.state.begin_close();

        let mut workers = self.workers.lock().await;
        for mut worker in workers.drain(..) {
            if timeout(CLOSE_TIMEOUT, &mut worker).await.is_err() {
                warn!(
                    timeout_ms = CLOSE_TIMEOUT.as_millis() as u64,
                    "Session worker did not stop in time, aborting"
                );
                worker.abort();
            }
        }

        self.state.mark_closed();
    }

    /// Returns `true` once the session started closing.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lifecycle() != Lifecycle::Open
    }
}

impl fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHandle")
            .field("lifecycle", &self.state.lifecycle())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::{BoxedStream, TcpDialer};

    #[tokio::test]
    async fn test_dial_without_dialer_fails() {
        let err = dial("example.com:80", Config::default()).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_dial_rejects_empty_destination() {
        let config = Config::new(TcpDialer::new("127.0.0.1:1"));
        let err = dial("  ", config).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_dial_failure_is_synchronous() {
        let config = Config::new(|_dest: String| async move {
            Err::<BoxedStream, _>(io::Error::new(io::ErrorKind::ConnectionRefused, "no relay"))
        });

        let err = dial("example.com:80", config).await.unwrap_err();
        assert!(matches!(err, Error::RelayDial { ref addr, .. } if addr == "example.com:80"));
    }
}
