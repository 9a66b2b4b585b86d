//! Outbound worker: application writes → `write` exchanges.
//!
//! Exchanges are never pipelined. Intermediaries between client and relay
//! are not guaranteed to deliver concurrent requests in order, and the
//! relay reassembles the stream by appending each body to the destination
//! socket as it arrives.
//!
//! # Loop
//!
//! The worker waits on three things at once:
//!
//! - the lifecycle leaving `Open` (close, drop, inbound failure)
//! - the next queued item
//! - the idle timer, which ends the session only if it is actually idle
//!
//! Whatever ends the loop, including a panic, the cleanup step closes the
//! submission gate and answers every queued item so no writer waits forever.

// ============================================================================
// Imports
// ============================================================================

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RelayPin, SessionToken};
use crate::protocol::{ExchangeStatus, Op};
use crate::transport::RelayConnection;

use super::state::{Lifecycle, SessionState};

// ============================================================================
// Types
// ============================================================================

/// One queued application write.
pub(crate) struct OutboundItem {
    /// Bytes to send.
    pub payload: Bytes,
    /// Completion for the writer.
    pub ack: oneshot::Sender<Result<()>>,
}

/// What the first exchange returned, handed to `dial` and then to the
/// inbound worker.
#[derive(Debug)]
pub(crate) struct InitialResponse {
    /// Session token minted by the relay.
    pub token: SessionToken,
    /// Relay pin.
    pub pin: Option<RelayPin>,
    /// Status of the first response.
    pub status: ExchangeStatus,
    /// Body of the first response.
    pub body: Bytes,
}

/// Why the worker loop ended.
enum Exit {
    /// Stop signal, idle timeout or closed queue.
    Clean,
    /// An exchange failed.
    Failed,
}

/// One wake-up of the worker loop.
enum Wake {
    Stop,
    Item(OutboundItem),
    QueueClosed,
    IdleTick,
}

// ============================================================================
// OutboundHandle
// ============================================================================

/// Submits writes to a session's outbound worker.
#[derive(Clone)]
pub(crate) struct OutboundHandle {
    tx: mpsc::UnboundedSender<OutboundItem>,
    state: Arc<SessionState>,
}

impl OutboundHandle {
    /// Queues a payload and waits for its exchange to finish.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the session no longer accepts writes
    /// - The exchange error if the relay write failed
    #[cfg(test)]
    pub(crate) async fn write(&self, payload: Bytes) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.submit(payload, ack)?;
        done.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    /// Queues a payload without waiting.
    pub(crate) fn submit(&self, payload: Bytes, ack: oneshot::Sender<Result<()>>) -> Result<()> {
        self.state
            .submit(&self.tx, OutboundItem { payload, ack })
            .map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// OutboundWorker
// ============================================================================

/// Serializes writes into `write` exchanges.
pub(crate) struct OutboundWorker {
    relay: RelayConnection,
    state: Arc<SessionState>,
    items: mpsc::UnboundedReceiver<OutboundItem>,
    stop: watch::Receiver<Lifecycle>,
    initial: Option<oneshot::Sender<Result<InitialResponse>>>,
    idle_timeout: Duration,
    seq: u64,
}

impl OutboundWorker {
    /// Spawns the worker.
    ///
    /// Returns the submission handle, the receiver for the first exchange's
    /// outcome, and the task handle.
    pub(crate) fn spawn(
        relay: RelayConnection,
        state: Arc<SessionState>,
        idle_timeout: Duration,
    ) -> (
        OutboundHandle,
        oneshot::Receiver<Result<InitialResponse>>,
        JoinHandle<()>,
    ) {
        let (tx, items) = mpsc::unbounded_channel();
        let (initial_tx, initial_rx) = oneshot::channel();

        let worker = Self {
            relay,
            stop: state.subscribe(),
            state: Arc::clone(&state),
            items,
            initial: Some(initial_tx),
            idle_timeout,
            seq: 0,
        };

        let task = tokio::spawn(worker.run());
        (OutboundHandle { tx, state }, initial_rx, task)
    }

    /// Runs the loop, then cleanup no matter how the loop ended.
    async fn run(mut self) {
        let outcome = AssertUnwindSafe(self.process()).catch_unwind().await;

        let (panicked, failed) = match outcome {
            Ok(Exit::Clean) => (false, false),
            Ok(Exit::Failed) => (false, true),
            Err(_) => {
                error!(dest = %self.relay.dest(), "Outbound worker panicked");
                (true, true)
            }
        };

        self.cleanup(panicked, failed);
    }

    async fn process(&mut self) -> Exit {
        loop {
            if *self.stop.borrow() != Lifecycle::Open {
                trace!(dest = %self.relay.dest(), "Outbound worker stopping");
                return Exit::Clean;
            }

            let wake = tokio::select! {
                biased;
                _ = self.stop.changed() => Wake::Stop,
                item = self.items.recv() => match item {
                    Some(item) => Wake::Item(item),
                    None => Wake::QueueClosed,
                },
                () = sleep(self.idle_timeout) => Wake::IdleTick,
            };

            match wake {
                Wake::Stop => continue,
                Wake::QueueClosed => return Exit::Clean,
                Wake::Item(item) => {
                    if let Some(exit) = self.handle(item).await {
                        return exit;
                    }
                }
                Wake::IdleTick => {
                    if self.state.is_idle(self.idle_timeout) {
                        debug!(
                            dest = %self.relay.dest(),
                            idle_ms = self.idle_timeout.as_millis() as u64,
                            "Session idle, closing"
                        );
                        return Exit::Clean;
                    }
                }
            }
        }
    }

    /// Issues one exchange. Returns the exit reason if the session must end.
    async fn handle(&mut self, item: OutboundItem) -> Option<Exit> {
        let seq = self.seq;
        self.seq += 1;
        let len = item.payload.len();

        // Once closing starts the exchange outcome no longer matters.
        let result = tokio::select! {
            biased;
            _ = self.stop.changed() => None,
            result = self.relay.exchange(Op::Write, seq, item.payload) => Some(result),
        };

        let Some(result) = result else {
            debug!(dest = %self.relay.dest(), seq, "Write exchange abandoned on stop");
            let _ = item.ack.send(Err(Error::ConnectionClosed));
            return Some(Exit::Clean);
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    dest = %self.relay.dest(),
                    seq,
                    error = %e,
                    "Unable to issue write exchange"
                );
                match self.initial.take() {
                    Some(initial) => {
                        let _ = initial.send(Err(e));
                    }
                    None => {
                        let _ = item.ack.send(Err(e));
                    }
                }
                return Some(Exit::Failed);
            }
        };

        if let Some(initial) = self.initial.take() {
            let Some(token) = response.token else {
                let _ = initial.send(Err(Error::protocol(
                    "Relay did not assign a session token",
                )));
                return Some(Exit::Failed);
            };

            // Later exchanges must reach the same relay instance.
            self.relay.attach(Some(token), response.pin.clone());

            let _ = item.ack.send(Ok(()));
            let _ = initial.send(Ok(InitialResponse {
                token,
                pin: response.pin,
                status: response.status,
                body: response.body,
            }));
            return None;
        }

        if len > 0 {
            self.state.touch();
        }
        trace!(seq, len, "Write exchange acknowledged");
        let _ = item.ack.send(Ok(()));
        None
    }

    /// Closes the gate, answers queued items and releases the relay.
    fn cleanup(&mut self, panicked: bool, failed: bool) {
        self.state.stop_accepting();
        self.items.close();

        let terminal = || {
            if panicked {
                Error::AbnormalTermination
            } else {
                Error::ConnectionClosed
            }
        };

        let mut drained = 0usize;
        while let Ok(item) = self.items.try_recv() {
            let _ = item.ack.send(Err(terminal()));
            drained += 1;
        }

        if let Some(initial) = self.initial.take() {
            let _ = initial.send(Err(terminal()));
        }

        if failed {
            self.state.mark_failed();
        }
        self.state.begin_close();
        self.relay.release();

        debug!(
            dest = %self.relay.dest(),
            drained,
            panicked,
            failed,
            dials = self.relay.dials(),
            "Outbound worker terminated"
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
