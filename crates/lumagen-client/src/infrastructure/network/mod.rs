//! Network infrastructure: the TCP session with the IP2SL bridge.
//!
//! Architecture:
//! - [`ConnectionManager`] owns one supervisor task.  The task connects,
//!   runs a session, and reconnects with exponential backoff until shut down.
//! - A session splits the socket.  The write half goes into
//!   [`SharedWriter`] for the dispatcher; the read half stays with the
//!   supervisor, which is the only reader of the stream.
//! - A liveness task sends the alive query through the dispatcher on a fixed
//!   interval.  Missed probes degrade the link and finally end the session.
//! - Right after connecting, a refresh task asks for the power state and the
//!   input labels.  Power is Unknown after every disconnect, and a report
//!   such as `Z1Warming` is only legal once Standby is known.
//!
//! # One read, one publish
//!
//! Each successful `read()` is fed to the framer, every complete frame is
//! classified and routed, and then the state tracker publishes once.  Reports
//! that arrive in the same read are coalesced into a single state event.

pub mod link;
pub mod writer;

use std::sync::Arc;

use lumagen_core::protocol::reports::MAX_INPUT;
use lumagen_core::{
    Command, CommandOutcome, ConnectionState, FailureKind, Framer, LivenessPolicy,
    LivenessVerdict, MessageKind,
};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::dispatcher::{CommandDispatcher, FrameWriter};
use crate::application::state_tracker::StateTracker;
use crate::infrastructure::config::ClientConfig;

pub use link::LinkState;
pub use writer::SharedWriter;

/// Bytes requested per socket read.
const READ_BUF_SIZE: usize = 1024;

/// Errors opening a session.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to connect to {addr}: {source}")]
    Failed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out after {timeout:?}")]
    TimedOut { addr: String, timeout: Duration },
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ClosedByPeer,
    ReadFailed,
    LivenessGaveUp,
    Shutdown,
}

/// Supervises the bridge connection for one client.
pub struct ConnectionManager {
    config: ClientConfig,
    link: Arc<LinkState>,
    writer: Arc<SharedWriter>,
    dispatcher: Arc<CommandDispatcher>,
    tracker: Arc<StateTracker>,
    shutdown: watch::Sender<bool>,
}

impl ConnectionManager {
    /// Wires the link state, writer and dispatcher together.  Nothing runs
    /// until [`ConnectionManager::spawn`].
    pub fn new(config: ClientConfig, tracker: Arc<StateTracker>) -> Self {
        let link = Arc::new(LinkState::new());
        let writer = Arc::new(SharedWriter::new());
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&writer) as Arc<dyn FrameWriter>,
            link.subscribe(),
            config.timeouts(),
            config.retry(),
        ));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            link,
            writer,
            dispatcher,
            tracker,
            shutdown,
        }
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn state(&self) -> ConnectionState {
        self.link.get()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.link.subscribe()
    }

    /// Starts the supervisor task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).supervise())
    }

    /// Asks the supervisor to close the socket and stop reconnecting.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn address(&self) -> String {
        format!("{}:{}", self.config.connection.host, self.config.connection.port)
    }

    // ── Supervisor ────────────────────────────────────────────────────────────

    async fn supervise(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let backoff = self.config.backoff();
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = backoff.delay_for(attempt);
            if !delay.is_zero() {
                info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
                tokio::select! {
                    _ = time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }

            self.link.set(ConnectionState::Connecting);
            let connected = tokio::select! {
                result = self.connect() => result,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok(stream) => {
                    let end = self.run_session(stream, &mut shutdown).await;
                    self.end_session(end).await;
                    // The next reconnect starts at the initial delay.
                    attempt = 1;
                }
                Err(e) => {
                    warn!(error = %e, "could not reach bridge");
                    self.link.set(ConnectionState::Disconnected);
                    attempt = attempt.saturating_add(1);
                }
            }
        }

        self.end_session(SessionEnd::Shutdown).await;
        info!("connection supervisor stopped");
    }

    async fn connect(&self) -> Result<TcpStream, ConnectError> {
        let addr = self.address();
        let timeout = self.config.connect_timeout();
        debug!(%addr, "connecting");
        let host = self.config.connection.host.as_str();
        let port = self.config.connection.port;

        match time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "could not disable Nagle");
                }
                Ok(stream)
            }
            Ok(Err(source)) => Err(ConnectError::Failed { addr, source }),
            Err(_) => Err(ConnectError::TimedOut { addr, timeout }),
        }
    }

    async fn run_session(
        &self,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.address());
        let (mut reader, write_half) = stream.into_split();
        self.writer.install(write_half).await;
        self.link.set(ConnectionState::Connected);
        info!(%peer, "connected to bridge");

        let mut liveness = tokio::spawn(liveness_loop(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.link),
            self.config.liveness(),
            self.config.probe_interval(),
        ));

        let refresh = tokio::spawn(refresh_after_connect(
            Arc::clone(&self.dispatcher),
            self.config.connection.fetch_labels_on_connect,
        ));

        let end = tokio::select! {
            end = self.read_loop(&mut reader) => end,
            _ = &mut liveness => SessionEnd::LivenessGaveUp,
            _ = shutdown.changed() => SessionEnd::Shutdown,
        };
        liveness.abort();
        refresh.abort();
        end
    }

    async fn read_loop(&self, reader: &mut OwnedReadHalf) -> SessionEnd {
        let mut framer = Framer::new(self.config.framer());
        let mut buf = vec![0u8; READ_BUF_SIZE];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => return SessionEnd::ClosedByPeer,
                Ok(n) => {
                    framer.feed(&buf[..n]);
                    drain_frames(&mut framer, &self.dispatcher, &self.tracker);
                    self.tracker.publish();
                }
                Err(e) => {
                    warn!(error = %e, "read from bridge failed");
                    return SessionEnd::ReadFailed;
                }
            }
        }
    }

    /// Tears down whatever session state exists.  Safe to call repeatedly.
    async fn end_session(&self, end: SessionEnd) {
        if self.link.get() != ConnectionState::Disconnected {
            match end {
                SessionEnd::Shutdown => info!("closing bridge connection"),
                other => warn!(
                    failure = %FailureKind::ConnectionLost,
                    reason = ?other,
                    "bridge session ended"
                ),
            }
        }
        self.link.set(ConnectionState::Disconnected);
        // Before the writer lock: a stalled write may hold it until its deadline.
        self.dispatcher.cancel_inflight();
        self.writer.clear().await;
        self.tracker.mark_disconnected();
    }
}

/// Routes every complete frame buffered in `framer`.
pub(crate) fn drain_frames(
    framer: &mut Framer,
    dispatcher: &CommandDispatcher,
    tracker: &StateTracker,
) {
    for item in framer.frames() {
        match item {
            Ok(frame) => {
                let message = dispatcher.on_frame(&frame);
                match &message.kind {
                    MessageKind::UnsolicitedReport(report) => {
                        tracker.apply(report);
                    }
                    MessageKind::Response => {
                        tracker.apply_response(&message.payload);
                    }
                    MessageKind::Echo => {}
                    MessageKind::Unknown => {
                        debug!(
                            failure = %FailureKind::ClassificationUnknown,
                            frame = %message.payload,
                            "dropping frame"
                        );
                    }
                }
            }
            Err(e) => warn!(failure = %FailureKind::FramingOverflow, error = %e, "frame discarded"),
        }
    }
}

/// Reads the state a fresh session cannot know yet.  Stops at the first
/// query that goes unanswered; the liveness loop deals with a dead link.
async fn refresh_after_connect(dispatcher: Arc<CommandDispatcher>, fetch_labels: bool) {
    let outcome = dispatcher.send(&Command::power_status()).await;
    if !outcome.is_acknowledged() {
        warn!(%outcome, "power query after connect failed");
        return;
    }
    if !fetch_labels {
        return;
    }

    for input in 1..=MAX_INPUT {
        let Ok(query) = Command::input_label(input) else {
            continue;
        };
        let outcome = dispatcher.send(&query).await;
        if !outcome.is_acknowledged() {
            warn!(input, %outcome, "input label query failed; skipping the rest");
            return;
        }
    }
    debug!("input labels refreshed");
}

/// Probes the link every `interval` until the miss budget is exhausted.
///
/// Returns only when the policy gives up on the link.
async fn liveness_loop(
    dispatcher: Arc<CommandDispatcher>,
    link: Arc<LinkState>,
    policy: LivenessPolicy,
    interval: Duration,
) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut misses: u32 = 0;

    loop {
        ticker.tick().await;
        match dispatcher.probe().await {
            None => continue,
            Some(CommandOutcome::Acknowledged(_)) => {
                if misses > 0 {
                    info!(misses, "liveness probe answered again");
                }
                misses = 0;
                if link.get() == ConnectionState::Degraded {
                    link.set(ConnectionState::Connected);
                }
            }
            Some(outcome) => {
                misses += 1;
                warn!(misses, %outcome, "liveness probe missed");
                match policy.verdict(misses) {
                    LivenessVerdict::Healthy => {}
                    LivenessVerdict::Degraded => {
                        link.set(ConnectionState::Degraded);
                    }
                    LivenessVerdict::GiveUp => {
                        warn!(misses, "bridge unresponsive; dropping connection");
                        return;
                    }
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
