//! Shared fixtures for integration tests.
//!
//! Provides:
//! - Logging initialization
//! - Destination servers (echo, closed port)
//! - A running relay
//! - Dialers that count open streams or inject latency

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use httptunnel::{BoxedStream, Dialer, Relay, RelayBuilder, TcpDialer, boxed};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, Sleep, sleep};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Logging
// ============================================================================

/// Initialize tracing once per test binary. Honors `RUST_LOG`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("httptunnel=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Destinations
// ============================================================================

/// Starts a destination that echoes every byte back. Returns its address.
pub async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo");
    let addr = listener.local_addr().expect("echo addr");

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// Returns an address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    addr
}

// ============================================================================
// Relay
// ============================================================================

/// Starts a relay from `builder` on a fresh port.
pub async fn start_relay(builder: RelayBuilder) -> (Arc<Relay>, SocketAddr) {
    let relay = builder.build().expect("build relay");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");

    tokio::spawn(Arc::clone(&relay).serve(listener));
    wait_until(Duration::from_secs(2), || relay.pin().is_some()).await;

    (relay, addr)
}

/// Starts a relay with short polls, suitable for most tests.
pub async fn quick_relay() -> (Arc<Relay>, SocketAddr) {
    start_relay(Relay::builder().poll_timeout(Duration::from_millis(100))).await
}

/// Polls `condition` until it holds or `limit` passes. Returns the final value.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// CountingDialer
// ============================================================================

/// Dials over TCP and counts the streams still open.
#[derive(Clone)]
pub struct CountingDialer {
    inner: TcpDialer,
    open: Arc<AtomicUsize>,
    dialed: Arc<AtomicUsize>,
}

impl CountingDialer {
    pub fn new(relay: SocketAddr) -> Self {
        Self {
            inner: TcpDialer::new(relay.to_string()),
            open: Arc::new(AtomicUsize::new(0)),
            dialed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Streams dialed and not yet dropped.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Streams dialed in total.
    pub fn dialed(&self) -> usize {
        self.dialed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Dialer for CountingDialer {
    async fn dial(&self, dest: &str) -> io::Result<BoxedStream> {
        let stream = self.inner.dial(dest).await?;
        self.open.fetch_add(1, Ordering::SeqCst);
        self.dialed.fetch_add(1, Ordering::SeqCst);
        Ok(boxed(Counted {
            inner: stream,
            open: Arc::clone(&self.open),
        }))
    }
}

struct Counted {
    inner: BoxedStream,
    open: Arc<AtomicUsize>,
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for Counted {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Counted {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

// ============================================================================
// LaggyDialer
// ============================================================================

/// Dials over TCP, delaying every second write on each stream.
///
/// Setting `stalled` makes every later write on every stream hang forever.
#[derive(Clone)]
pub struct LaggyDialer {
    relay: SocketAddr,
    delay: Duration,
    stalled: Arc<AtomicBool>,
}

impl LaggyDialer {
    pub fn new(relay: SocketAddr, delay: Duration) -> Self {
        Self {
            relay,
            delay,
            stalled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes all further writes hang.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Dialer for LaggyDialer {
    async fn dial(&self, _dest: &str) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(self.relay).await?;
        stream.set_nodelay(true)?;
        Ok(boxed(Laggy {
            inner: stream,
            delay: self.delay,
            writes: 0,
            pending: None,
            stalled: Arc::clone(&self.stalled),
        }))
    }
}

struct Laggy {
    inner: TcpStream,
    delay: Duration,
    writes: u64,
    pending: Option<Pin<Box<Sleep>>>,
    stalled: Arc<AtomicBool>,
}

impl AsyncRead for Laggy {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Laggy {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.stalled.load(Ordering::SeqCst) {
            return Poll::Pending;
        }

        if self.pending.is_none() {
            self.writes += 1;
            if self.writes % 2 == 0 {
                self.pending = Some(Box::pin(sleep(self.delay)));
            }
        }
        if let Some(delay) = self.pending.as_mut() {
            if delay.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            self.pending = None;
        }

        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
