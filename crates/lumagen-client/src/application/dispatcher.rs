//! CommandDispatcher: serialises commands onto the link and matches their
//! echoes and responses.
//!
//! # The command slot (for beginners)
//!
//! The device answers in order and carries no request ids, so only one
//! command may be outstanding at a time.  Callers queue on an async mutex
//! (`turn`); whoever holds it owns the wire until its command resolves.
//!
//! While a command is outstanding its bookkeeping lives in [`Slot`]:
//!
//! ```text
//!   Idle ──write──> AwaitingEcho ──echo (action)──> Idle
//!                        │
//!                        └──echo (query)──> AwaitingResponse ──response──> Idle
//! ```
//!
//! The read loop calls [`CommandDispatcher::on_frame`] for every frame.  Echoes
//! and responses are forwarded to the waiting `send` through a channel; when
//! the connection drops the channel sender is dropped and the waiter resolves
//! immediately with `ConnectionUnavailable`.
//!
//! A response is only accepted once the echo has been seen.  A device with
//! echo disabled therefore fails every command with `TimedOut(Echo)`, even
//! when it answers queries.
//!
//! The write itself is bounded by the echo deadline, so a socket that stops
//! draining cannot hold the slot forever.
//!
//! The slot and the classifier sit behind a `std::sync::Mutex` that is never
//! held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use lumagen_core::protocol::framer::DEFAULT_TERMINATOR;
use lumagen_core::{
    ClassifiedMessage, Classifier, Command, CommandOutcome, CommandTimeouts, ConnectionState,
    MessageKind, PendingCommand, RawFrame, RetryDecision, RetryPolicy, SequenceCounter,
    TimeoutStage,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout_at;
use tracing::{debug, info, warn};

/// Error type for the writer seam.
#[derive(Debug, Error)]
pub enum WriteError {
    /// No socket is currently open.
    #[error("not connected")]
    NotConnected,

    /// The socket write failed.
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Sink for encoded command bytes.
///
/// The network layer implements this over the socket's write half; tests use
/// recording doubles or mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameWriter: Send + Sync {
    /// Writes one encoded command, terminator included.
    async fn write_frame(&self, bytes: &[u8]) -> Result<(), WriteError>;
}

/// Progress reported by the read loop to the waiting `send`.
#[derive(Debug)]
enum Progress {
    Echo(String),
    Response(String),
}

/// Bookkeeping for the outstanding command.
struct InFlight {
    pending: PendingCommand,
    progress: mpsc::UnboundedSender<Progress>,
}

/// Where the outstanding command is in its lifecycle.
enum Slot {
    Idle,
    AwaitingEcho(InFlight),
    AwaitingResponse(InFlight),
}

/// Observable stage of the slot, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStage {
    Idle,
    AwaitingEcho,
    AwaitingResponse,
}

struct DispatchState {
    classifier: Classifier,
    slot: Slot,
}

impl DispatchState {
    fn deliver_echo(&mut self, text: &str, timeouts: CommandTimeouts) {
        match std::mem::replace(&mut self.slot, Slot::Idle) {
            Slot::AwaitingEcho(mut flight) => {
                debug!(id = flight.pending.id, echo = %text, "echo received");
                let _ = flight.progress.send(Progress::Echo(text.to_string()));
                if flight.pending.expected_response.is_some() {
                    flight.pending.timeout = timeouts.response;
                    self.slot = Slot::AwaitingResponse(flight);
                } else {
                    self.classifier.clear_expectation();
                }
            }
            other => {
                // Late echo of a command that already resolved, or a repeat.
                debug!(echo = %text, "echo with no command awaiting it");
                self.slot = other;
            }
        }
    }

    fn deliver_response(&mut self, text: &str) {
        match std::mem::replace(&mut self.slot, Slot::Idle) {
            Slot::AwaitingResponse(flight) => {
                debug!(id = flight.pending.id, response = %text, "response received");
                let _ = flight.progress.send(Progress::Response(text.to_string()));
                self.classifier.clear_expectation();
            }
            Slot::AwaitingEcho(flight) => {
                warn!(id = flight.pending.id, response = %text, "response before echo; ignoring");
                self.slot = Slot::AwaitingEcho(flight);
            }
            Slot::Idle => debug!(response = %text, "response with no command awaiting it"),
        }
    }
}

/// How waiting for an acknowledgement ended without one.
enum WaitFailure {
    TimedOut(TimeoutStage),
    Closed,
}

/// Resets the slot when an attempt ends, however it ends (including the
/// caller dropping the `send` future).
struct AttemptGuard<'a> {
    state: &'a Mutex<DispatchState>,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        state.slot = Slot::Idle;
        state.classifier.clear_expectation();
    }
}

fn lock(state: &Mutex<DispatchState>) -> MutexGuard<'_, DispatchState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the command slot and the classifier.
pub struct CommandDispatcher {
    writer: Arc<dyn FrameWriter>,
    link: watch::Receiver<ConnectionState>,
    ids: SequenceCounter,
    timeouts: CommandTimeouts,
    retry: RetryPolicy,
    terminator: u8,
    /// Capacity-one, FIFO-fair command slot.
    turn: tokio::sync::Mutex<()>,
    state: Mutex<DispatchState>,
}

impl CommandDispatcher {
    /// Creates a dispatcher that writes through `writer` and consults `link`
    /// before every command.
    pub fn new(
        writer: Arc<dyn FrameWriter>,
        link: watch::Receiver<ConnectionState>,
        timeouts: CommandTimeouts,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            writer,
            link,
            ids: SequenceCounter::new(),
            timeouts,
            retry,
            terminator: DEFAULT_TERMINATOR,
            turn: tokio::sync::Mutex::new(()),
            state: Mutex::new(DispatchState {
                classifier: Classifier::new(),
                slot: Slot::Idle,
            }),
        }
    }

    fn link_state(&self) -> ConnectionState {
        *self.link.borrow()
    }

    /// Sends a caller command and waits for it to resolve.
    ///
    /// Refused with `ConnectionUnavailable` unless the link is Connected.
    pub async fn send(&self, command: &Command) -> CommandOutcome {
        if !self.link_state().accepts_commands() {
            debug!(command = %command, state = %self.link_state(), "refusing command");
            return CommandOutcome::ConnectionUnavailable;
        }

        let _turn = self.turn.lock().await;

        // The link may have dropped while queued.
        if !self.link_state().accepts_commands() {
            return CommandOutcome::ConnectionUnavailable;
        }
        self.run(command).await
    }

    /// Sends the alive query if the slot is free.
    ///
    /// Returns `None` when another command holds the slot; a busy link is
    /// evidently alive.  Allowed while Degraded.
    pub async fn probe(&self) -> Option<CommandOutcome> {
        if !self.link_state().accepts_probes() {
            return Some(CommandOutcome::ConnectionUnavailable);
        }
        let Ok(_turn) = self.turn.try_lock() else {
            debug!("slot busy; skipping liveness probe");
            return None;
        };
        Some(self.run(&Command::alive()).await)
    }

    /// Classifies a frame and forwards echoes and responses to the waiting
    /// command.  Returns the classification so the caller can route reports.
    pub fn on_frame(&self, frame: &RawFrame) -> ClassifiedMessage {
        let mut state = lock(&self.state);
        let message = state.classifier.classify(frame);
        match message.kind {
            MessageKind::Echo => state.deliver_echo(&message.payload, self.timeouts),
            MessageKind::Response => state.deliver_response(&message.payload),
            MessageKind::UnsolicitedReport(_) | MessageKind::Unknown => {}
        }
        message
    }

    /// Drops the outstanding command's channel so its waiter resolves with
    /// `ConnectionUnavailable`, and forgets the classifier context.
    pub fn cancel_inflight(&self) {
        let mut state = lock(&self.state);
        if let Slot::AwaitingEcho(flight) | Slot::AwaitingResponse(flight) =
            std::mem::replace(&mut state.slot, Slot::Idle)
        {
            info!(id = flight.pending.id, "cancelling in-flight command");
        }
        state.classifier.reset();
    }

    pub fn stage(&self) -> SlotStage {
        match lock(&self.state).slot {
            Slot::Idle => SlotStage::Idle,
            Slot::AwaitingEcho(_) => SlotStage::AwaitingEcho,
            Slot::AwaitingResponse(_) => SlotStage::AwaitingResponse,
        }
    }

    /// Copy of the outstanding command record, if any.
    pub fn pending(&self) -> Option<PendingCommand> {
        match &lock(&self.state).slot {
            Slot::Idle => None,
            Slot::AwaitingEcho(f) | Slot::AwaitingResponse(f) => Some(f.pending.clone()),
        }
    }

    // ── Attempt loop ──────────────────────────────────────────────────────────

    async fn run(&self, command: &Command) -> CommandOutcome {
        let id = self.ids.next();
        let bytes = command.encode(self.terminator);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let (tx, mut rx) = mpsc::unbounded_channel();
            let guard = self.install(PendingCommand {
                id,
                raw_bytes_sent: bytes.clone(),
                issued_at: Instant::now(),
                expected_echo: command.text().to_string(),
                expected_response: command.expected_response(),
                timeout: self.timeouts.echo,
                retries_remaining: self.retry.total_attempts().saturating_sub(attempts),
            }, tx);

            debug!(id, attempt = attempts, command = %command, "writing command");
            let echo_deadline = tokio::time::Instant::now() + self.timeouts.echo;
            let result = match timeout_at(echo_deadline, self.writer.write_frame(&bytes)).await {
                Ok(Ok(())) => self.await_ack(command, &mut rx, echo_deadline).await,
                Ok(Err(e)) => {
                    warn!(id, command = %command, error = %e, "command write failed");
                    return CommandOutcome::ConnectionUnavailable;
                }
                Err(_) => {
                    warn!(id, command = %command, "write stalled past the echo deadline");
                    Err(WaitFailure::TimedOut(TimeoutStage::Echo))
                }
            };

            match result {
                Ok(payload) => {
                    debug!(id, command = %command, payload = %payload, "command acknowledged");
                    return CommandOutcome::Acknowledged(payload);
                }
                Err(WaitFailure::Closed) => {
                    warn!(id, command = %command, "connection lost while command in flight");
                    return CommandOutcome::ConnectionUnavailable;
                }
                Err(WaitFailure::TimedOut(stage)) => {
                    drop(guard);
                    match self.retry.decide(attempts) {
                        RetryDecision::Retry => {
                            warn!(
                                id,
                                attempt = attempts,
                                ?stage,
                                command = %command,
                                "command timed out; retrying"
                            );
                        }
                        RetryDecision::GiveUp => {
                            warn!(id, attempts, ?stage, command = %command, "command timed out");
                            return CommandOutcome::TimedOut(stage);
                        }
                    }
                }
            }
        }
    }

    fn install(
        &self,
        pending: PendingCommand,
        progress: mpsc::UnboundedSender<Progress>,
    ) -> AttemptGuard<'_> {
        let mut state = lock(&self.state);
        state
            .classifier
            .arm(&pending.expected_echo, pending.expected_response);
        state.slot = Slot::AwaitingEcho(InFlight { pending, progress });
        AttemptGuard { state: &self.state }
    }

    async fn await_ack(
        &self,
        command: &Command,
        rx: &mut mpsc::UnboundedReceiver<Progress>,
        echo_deadline: tokio::time::Instant,
    ) -> Result<String, WaitFailure> {
        let echo = loop {
            match timeout_at(echo_deadline, rx.recv()).await {
                Err(_) => return Err(WaitFailure::TimedOut(TimeoutStage::Echo)),
                Ok(None) => return Err(WaitFailure::Closed),
                Ok(Some(Progress::Echo(payload))) => break payload,
                Ok(Some(Progress::Response(_))) => continue,
            }
        };

        if command.expected_response().is_none() {
            return Ok(echo);
        }

        let response_deadline = tokio::time::Instant::now() + self.timeouts.response;
        loop {
            match timeout_at(response_deadline, rx.recv()).await {
                Err(_) => return Err(WaitFailure::TimedOut(TimeoutStage::Response)),
                Ok(None) => return Err(WaitFailure::Closed),
                Ok(Some(Progress::Response(payload))) => return Ok(payload),
                Ok(Some(Progress::Echo(_))) => continue,
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
