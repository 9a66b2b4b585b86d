//! Inbound worker: `read` exchanges → application reads.
//!
//! Mirrors the outbound worker. It starts from the first response captured
//! by `dial`, then long-polls the relay one exchange at a time, tagged with
//! the session token and pin, until end-of-stream, an error, or stop.

// ============================================================================
// Imports
// ============================================================================

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::error::Error;
use crate::protocol::{ExchangeStatus, Op};
use crate::transport::RelayConnection;

use super::outbound::InitialResponse;
use super::state::{Lifecycle, SessionState};

// ============================================================================
// Constants
// ============================================================================

/// Polled chunks buffered ahead of the application.
const INBOUND_CHANNEL_CAPACITY: usize = 8;

// ============================================================================
// InboundItem
// ============================================================================

/// One delivery to the read path.
#[derive(Debug)]
pub(crate) enum InboundItem {
    /// Bytes from the destination.
    Data(Bytes),
    /// The destination closed the stream.
    Eof,
    /// Polling failed; the session is over.
    Failed(Error),
}

// ============================================================================
// InboundWorker
// ============================================================================

/// Polls the relay for destination bytes.
pub(crate) struct InboundWorker {
    relay: RelayConnection,
    state: Arc<SessionState>,
    tx: mpsc::Sender<InboundItem>,
    stop: watch::Receiver<Lifecycle>,
    initial: Option<InitialResponse>,
    seq: u64,
}

impl InboundWorker {
    /// Spawns the worker, returning the read-side receiver and task handle.
    pub(crate) fn spawn(
        relay: RelayConnection,
        state: Arc<SessionState>,
        initial: InitialResponse,
    ) -> (mpsc::Receiver<InboundItem>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        let worker = Self {
            relay,
            stop: state.subscribe(),
            state,
            tx,
            initial: Some(initial),
            seq: 0,
        };

        (rx, tokio::spawn(worker.run()))
    }

    async fn run(mut self) {
        let outcome = AssertUnwindSafe(self.process()).catch_unwind().await;

        if outcome.is_err() {
            error!(dest = %self.relay.dest(), "Inbound worker panicked");
            self.state.mark_failed();
            self.deliver(InboundItem::Failed(Error::AbnormalTermination))
                .await;
            self.state.begin_close();
        }

        self.relay.release();
        debug!(
            dest = %self.relay.dest(),
            polls = self.seq,
            dials = self.relay.dials(),
            "Inbound worker terminated"
        );
    }

    async fn process(&mut self) {
        if let Some(initial) = self.initial.take() {
            if !initial.body.is_empty() {
                self.state.touch();
                if !self.deliver(InboundItem::Data(initial.body)).await {
                    return;
                }
            }
            if initial.status == ExchangeStatus::Eof {
                self.deliver(InboundItem::Eof).await;
                return;
            }
        }

        loop {
            if *self.stop.borrow() != Lifecycle::Open {
                return;
            }

            let seq = self.seq;
            self.seq += 1;

            // A poll carries no application bytes, so dropping one
            // mid-flight on stop loses nothing the caller wrote.
            let result = tokio::select! {
                biased;
                _ = self.stop.changed() => None,
                result = self.relay.exchange(Op::Read, seq, Bytes::new()) => Some(result),
            };

            let Some(result) = result else {
                trace!(seq, "Poll abandoned on stop");
                return;
            };

            match result {
                Ok(response) => {
                    let eof = response.is_eof();
                    if !response.body.is_empty() {
                        self.state.touch();
                        trace!(seq, len = response.body.len(), "Poll returned data");
                        if !self.deliver(InboundItem::Data(response.body)).await {
                            return;
                        }
                    }
                    if eof {
                        debug!(dest = %self.relay.dest(), "Destination reached end-of-stream");
                        self.deliver(InboundItem::Eof).await;
                        return;
                    }
                }
                Err(e) => {
                    if *self.stop.borrow() != Lifecycle::Open {
                        return;
                    }
                    warn!(
                        dest = %self.relay.dest(),
                        seq,
                        error = %e,
                        "Unable to issue read exchange"
                    );
                    self.state.mark_failed();
                    self.deliver(InboundItem::Failed(e)).await;
                    // The outbound side cannot continue without a reader.
                    self.state.begin_close();
                    return;
                }
            }
        }
    }

    /// Hands an item to the read path. Returns `false` if nobody will read it.
    async fn deliver(&mut self, item: InboundItem) -> bool {
        if *self.stop.borrow() != Lifecycle::Open {
            return self.tx.try_send(item).is_ok();
        }

        tokio::select! {
            biased;
            sent = self.tx.send(item) => sent.is_ok(),
            _ = self.stop.changed() => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;

    use crate::identifiers::SessionToken;
    use crate::transport::{BoxedStream, Dialer};

    fn failing_relay() -> RelayConnection {
        let dialer: Arc<dyn Dialer> = Arc::new(|_dest: String| async move {
            Err::<BoxedStream, _>(io::Error::new(io::ErrorKind::ConnectionRefused, "down"))
        });
        RelayConnection::new(dialer, "example.com:80")
    }

    fn initial(status: ExchangeStatus, body: &'static [u8]) -> InitialResponse {
        InitialResponse {
            token: SessionToken::generate(),
            pin: None,
            status,
            body: Bytes::from_static(body),
        }
    }

    #[tokio::test]
    async fn test_initial_body_then_eof() {
        let state = SessionState::new();
        let (mut rx, task) = InboundWorker::spawn(
            failing_relay(),
            Arc::clone(&state),
            initial(ExchangeStatus::Eof, b"first"),
        );

        assert!(matches!(rx.recv().await, Some(InboundItem::Data(b)) if b == "first"));
        assert!(matches!(rx.recv().await, Some(InboundItem::Eof)));
        assert!(rx.recv().await.is_none());
        task.await.expect("join");
    }

    #[tokio::test]
    async fn test_poll_failure_is_reported_and_closes_session() {
        let state = SessionState::new();
        let (mut rx, task) = InboundWorker::spawn(
            failing_relay(),
            Arc::clone(&state),
            initial(ExchangeStatus::Data, b""),
        );

        assert!(matches!(
            rx.recv().await,
            Some(InboundItem::Failed(Error::RelayDial { .. }))
        ));
        task.await.expect("join");

        assert!(state.has_failed());
        assert_eq!(state.lifecycle(), Lifecycle::Closing);
    }

    #[tokio::test]
    async fn test_stop_before_polling() {
        let state = SessionState::new();
        state.begin_close();
        let (mut rx, task) = InboundWorker::spawn(
            failing_relay(),
            Arc::clone(&state),
            initial(ExchangeStatus::Data, b""),
        );

        task.await.expect("join");
        assert!(rx.recv().await.is_none());
        assert!(!state.has_failed());
    }
}
