//! Relay session table.
//!
//! Maps session tokens to live destination connections. Each entry owns its
//! destination socket split into halves, each behind its own async mutex, so
//! a long-poll and a write for the same session proceed independently while
//! the sweep can tell whether either half is busy.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │                SessionTable               │
//! │  token A → SessionEntry ─┬─ reader half   │
//! │                          └─ writer half   │
//! │  token B → SessionEntry ─┬─ reader half   │
//! │                          └─ writer half   │
//! └───────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::SessionToken;

// ============================================================================
// Constants
// ============================================================================

/// Largest chunk returned by one poll.
const READ_CHUNK: usize = 32 * 1024;

// ============================================================================
// Types
// ============================================================================

/// Result of polling a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes read before the deadline.
    Data(Bytes),
    /// Nothing arrived before the deadline.
    Empty,
    /// The destination closed its side.
    Eof,
}

/// Snapshot of one session, for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Session token.
    pub token: SessionToken,
    /// Destination address.
    pub dest: String,
    /// Client that opened the session.
    pub client: SocketAddr,
    /// Bytes written to the destination.
    pub bytes_sent: u64,
    /// Bytes read from the destination.
    pub bytes_received: u64,
    /// Time since the last exchange.
    pub idle: Duration,
}

/// Read side of the destination plus its sequence counter.
struct Reader {
    half: OwnedReadHalf,
    next_seq: u64,
}

/// Write side of the destination plus its sequence counter.
struct Writer {
    half: OwnedWriteHalf,
    next_seq: u64,
}

/// Checks and advances a per-direction sequence counter.
fn advance(next_seq: &mut u64, seq: u64) -> Result<()> {
    if seq != *next_seq {
        return Err(Error::out_of_order(*next_seq, seq));
    }
    *next_seq += 1;
    Ok(())
}

// ============================================================================
// SessionEntry
// ============================================================================

/// One relayed session.
pub struct SessionEntry {
    token: SessionToken,
    dest: String,
    client: SocketAddr,
    reader: AsyncMutex<Reader>,
    writer: AsyncMutex<Writer>,
    last_activity: Mutex<Instant>,
    /// Set once the destination is gone; the entry must not be used again.
    dead: AtomicBool,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl SessionEntry {
    /// Dials `dest` and wraps the connection in a fresh entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DestinationUnreachable`] if the dial fails or takes
    /// longer than `dial_timeout`.
    pub async fn open(dest: &str, client: SocketAddr, dial_timeout: Duration) -> Result<Self> {
        let stream = match timeout(dial_timeout, TcpStream::connect(dest)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::destination_unreachable(dest, e.to_string())),
            Err(_) => {
                return Err(Error::destination_unreachable(
                    dest,
                    format!("dial timed out after {}ms", dial_timeout.as_millis()),
                ));
            }
        };
        let _ = stream.set_nodelay(true);

        Ok(Self::from_stream(SessionToken::generate(), dest, client, stream))
    }

    /// Wraps an established destination connection.
    #[must_use]
    pub fn from_stream(
        token: SessionToken,
        dest: impl Into<String>,
        client: SocketAddr,
        stream: TcpStream,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            token,
            dest: dest.into(),
            client,
            reader: AsyncMutex::new(Reader {
                half: read_half,
                next_seq: 0,
            }),
            writer: AsyncMutex::new(Writer {
                half: write_half,
                next_seq: 0,
            }),
            last_activity: Mutex::new(Instant::now()),
            dead: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    /// Returns the session token.
    #[inline]
    #[must_use]
    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// Returns the destination address.
    #[inline]
    #[must_use]
    pub fn dest(&self) -> &str {
        &self.dest
    }

    /// Returns the client address that opened the session.
    #[inline]
    #[must_use]
    pub fn client(&self) -> SocketAddr {
        self.client
    }

    /// Returns `true` once the destination is gone.
    #[inline]
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Refreshes the last-activity timestamp.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Returns the time since the last exchange.
    #[must_use]
    pub fn idle(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    fn mark_dead(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_dead() {
            return Err(Error::session_lost(self.token));
        }
        Ok(())
    }

    /// Writes one exchange's payload to the destination.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionLost`] if the entry died
    /// - [`Error::OutOfOrder`] if `seq` is not the next write sequence
    /// - [`Error::WriteFailed`] if the destination write failed; the entry
    ///   is dead afterwards
    pub async fn write(&self, seq: u64, payload: &[u8]) -> Result<usize> {
        let mut writer = self.writer.lock().await;
        self.ensure_alive()?;
        advance(&mut writer.next_seq, seq)?;

        if !payload.is_empty()
            && let Err(e) = writer.half.write_all(payload).await
        {
            self.mark_dead();
            return Err(Error::write_failed(format!("{}: {e}", self.dest)));
        }

        self.bytes_sent
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
        self.touch();
        trace!(token = %self.token, seq, len = payload.len(), "Wrote to destination");
        Ok(payload.len())
    }

    /// Reads what the destination has, waiting at most `wait`.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionLost`] if the entry died
    /// - [`Error::OutOfOrder`] if `seq` is not the next read sequence
    pub async fn read(&self, seq: u64, wait: Duration) -> Result<ReadOutcome> {
        let mut reader = self.reader.lock().await;
        self.ensure_alive()?;
        advance(&mut reader.next_seq, seq)?;

        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let outcome = match timeout(wait, reader.half.read_buf(&mut buf)).await {
            Err(_) => ReadOutcome::Empty,
            Ok(Ok(0)) => {
                self.mark_dead();
                ReadOutcome::Eof
            }
            Ok(Ok(n)) => {
                self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                ReadOutcome::Data(buf.freeze())
            }
            Ok(Err(e)) => {
                warn!(token = %self.token, dest = %self.dest, error = %e, "Destination read failed");
                self.mark_dead();
                ReadOutcome::Eof
            }
        };

        self.touch();
        Ok(outcome)
    }

    /// Marks the entry dead if neither half is in use.
    ///
    /// Returns `false` if an operation holds a half.
    fn try_retire(&self) -> bool {
        let Ok(_reader) = self.reader.try_lock() else {
            return false;
        };
        let Ok(_writer) = self.writer.try_lock() else {
            return false;
        };
        self.mark_dead();
        true
    }

    /// Returns a monitoring snapshot.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            token: self.token,
            dest: self.dest.clone(),
            client: self.client,
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            idle: self.idle(),
        }
    }
}

// ============================================================================
// SessionTable
// ============================================================================

/// Live sessions keyed by token.
#[derive(Default)]
pub struct SessionTable {
    entries: RwLock<FxHashMap<SessionToken, Arc<SessionEntry>>>,
}

impl SessionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry and returns the shared handle.
    pub fn insert(&self, entry: SessionEntry) -> Arc<SessionEntry> {
        let entry = Arc::new(entry);
        self.entries.write().insert(entry.token, Arc::clone(&entry));
        debug!(token = %entry.token, dest = %entry.dest, "Session opened");
        entry
    }

    /// Looks up a live entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionLost`] if the token is unknown or its entry
    /// is dead.
    pub fn get(&self, token: SessionToken) -> Result<Arc<SessionEntry>> {
        let entries = self.entries.read();
        match entries.get(&token) {
            Some(entry) if !entry.is_dead() => Ok(Arc::clone(entry)),
            _ => Err(Error::session_lost(token)),
        }
    }

    /// Removes an entry, dropping the destination once in-flight handles go.
    pub fn remove(&self, token: SessionToken) -> Option<Arc<SessionEntry>> {
        let removed = self.entries.write().remove(&token);
        if let Some(entry) = &removed {
            entry.mark_dead();
            debug!(token = %token, dest = %entry.dest, "Session removed");
        }
        removed
    }

    /// Evicts entries idle for at least `idle` whose halves are free.
    ///
    /// Returns the number of evicted entries.
    pub fn sweep(&self, idle: Duration) -> usize {
        let candidates: Vec<Arc<SessionEntry>> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.is_dead() || entry.idle() >= idle)
            .cloned()
            .collect();

        let mut evicted = 0;
        for entry in candidates {
            if !entry.is_dead() && !entry.try_retire() {
                trace!(token = %entry.token, "Idle session busy, skipping eviction");
                continue;
            }
            if self.entries.write().remove(&entry.token).is_some() {
                debug!(
                    token = %entry.token,
                    dest = %entry.dest,
                    idle_ms = entry.idle().as_millis() as u64,
                    "Evicted idle session"
                );
                evicted += 1;
            }
        }
        evicted
    }

    /// Removes every entry.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.entries.write().drain().collect();
        for (_, entry) in &drained {
            entry.mark_dead();
        }
        drained.len()
    }

    /// Returns the number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if the table is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns a snapshot of every entry.
    #[must_use]
    pub fn stats(&self) -> Vec<SessionStats> {
        self.entries.read().values().map(|e| e.stats()).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    /// Returns an entry wired to a local socket, plus the destination end.
    async fn entry_pair() -> (SessionEntry, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let client: SocketAddr = "127.0.0.1:1".parse().expect("client addr");

        let dest = addr.to_string();
        let (entry, accepted) = tokio::join!(
            SessionEntry::open(&dest, client, Duration::from_secs(1)),
            listener.accept()
        );
        (entry.expect("open"), accepted.expect("accept").0)
    }

    #[tokio::test]
    async fn test_write_reaches_destination() {
        let (entry, mut dest) = entry_pair().await;

        assert_eq!(entry.write(0, b"").await.expect("open write"), 0);
        assert_eq!(entry.write(1, b"hello").await.expect("write"), 5);

        let mut buf = [0u8; 5];
        dest.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"hello");
        assert_eq!(entry.stats().bytes_sent, 5);
    }

    #[tokio::test]
    async fn test_write_out_of_order() {
        let (entry, _dest) = entry_pair().await;

        let err = entry.write(3, b"x").await.unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { expected: 0, actual: 3 }));
    }

    #[tokio::test]
    async fn test_read_empty_then_data_then_eof() {
        let (entry, mut dest) = entry_pair().await;
        let wait = Duration::from_millis(50);

        assert_eq!(entry.read(0, wait).await.expect("poll"), ReadOutcome::Empty);

        dest.write_all(b"pong").await.expect("write");
        assert_eq!(
            entry.read(1, Duration::from_secs(2)).await.expect("poll"),
            ReadOutcome::Data(Bytes::from_static(b"pong"))
        );

        drop(dest);
        assert_eq!(
            entry.read(2, Duration::from_secs(2)).await.expect("poll"),
            ReadOutcome::Eof
        );
        assert!(entry.is_dead());
        assert!(matches!(
            entry.read(3, wait).await,
            Err(Error::SessionLost { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let client: SocketAddr = "127.0.0.1:1".parse().expect("client addr");
        let result = SessionEntry::open(&addr.to_string(), client, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::DestinationUnreachable { .. })));
    }

    #[tokio::test]
    async fn test_table_get_and_remove() {
        let (entry, _dest) = entry_pair().await;
        let table = SessionTable::new();
        let token = table.insert(entry).token();

        assert_eq!(table.len(), 1);
        assert!(table.get(token).is_ok());

        let removed = table.remove(token).expect("removed");
        assert!(removed.is_dead());
        assert!(matches!(table.get(token), Err(Error::SessionLost { .. })));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_skips_busy_entries() {
        let (entry, _dest) = entry_pair().await;
        let table = SessionTable::new();
        let entry = table.insert(entry);

        // A poll in progress holds the reader half.
        let polling = {
            let entry = Arc::clone(&entry);
            tokio::spawn(async move { entry.read(0, Duration::from_millis(300)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(table.sweep(Duration::ZERO), 0);
        assert_eq!(table.len(), 1);

        assert_eq!(polling.await.expect("join").expect("poll"), ReadOutcome::Empty);
        assert_eq!(table.sweep(Duration::ZERO), 1);
        assert!(table.is_empty());
        assert!(entry.is_dead());
    }

    #[tokio::test]
    async fn test_sweep_keeps_active_entries() {
        let (entry, _dest) = entry_pair().await;
        let table = SessionTable::new();
        table.insert(entry);

        assert_eq!(table.sweep(Duration::from_secs(60)), 0);
        assert_eq!(table.len(), 1);
        assert_eq!(table.stats().len(), 1);
    }
}
