//! Pluggable relay dialers.
//!
//! The session engine never knows how a relay connection is made; it asks a
//! [`Dialer`] for a byte stream and speaks HTTP/1.1 over whatever comes back.
//!
//! # Example
//!
//! ```no_run
//! use httptunnel::transport::{BoxedStream, boxed};
//! use tokio::net::TcpStream;
//!
//! // Any `Fn(String) -> Future<Output = io::Result<BoxedStream>>` is a dialer.
//! let dialer = |_dest: String| async move {
//!     let stream = TcpStream::connect("relay.example.com:80").await?;
//!     Ok::<BoxedStream, std::io::Error>(boxed(stream))
//! };
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for [`TcpDialer`] connects.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Types
// ============================================================================

/// A byte stream to the relay.
pub trait RelayStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RelayStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased relay stream returned by dialers.
pub type BoxedStream = Box<dyn RelayStream>;

/// Boxes a stream for return from a dialer.
#[inline]
pub fn boxed<S: RelayStream>(stream: S) -> BoxedStream {
    Box::new(stream)
}

// ============================================================================
// Dialer
// ============================================================================

/// Opens connections to the relay.
///
/// `dest` is the session's final destination, passed so a dialer can pick a
/// relay per destination; most dialers ignore it.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Opens a new connection to the relay.
    async fn dial(&self, dest: &str) -> io::Result<BoxedStream>;
}

#[async_trait]
impl<F, Fut> Dialer for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<BoxedStream>> + Send + 'static,
{
    async fn dial(&self, dest: &str) -> io::Result<BoxedStream> {
        (self)(dest.to_string()).await
    }
}

// ============================================================================
// TcpDialer
// ============================================================================

/// Dials a fixed relay address over plain TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    /// Relay address (`host:port`).
    relay_addr: String,
    /// Connect timeout.
    connect_timeout: Duration,
}

impl TcpDialer {
    /// Creates a dialer for the given relay address.
    #[inline]
    #[must_use]
    pub fn new(relay_addr: impl Into<String>) -> Self {
        Self {
            relay_addr: relay_addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Returns the relay address.
    #[inline]
    #[must_use]
    pub fn relay_addr(&self) -> &str {
        &self.relay_addr
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, dest: &str) -> io::Result<BoxedStream> {
        trace!(relay = %self.relay_addr, dest, "Dialing relay");

        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.relay_addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", self.relay_addr),
                )
            })??;
        stream.set_nodelay(true)?;

        Ok(boxed(stream))
    }
}

// ============================================================================
// Tests
// ============================================================================
