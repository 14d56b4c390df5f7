//! `LumagenClient`: the handle an integration holds.
//!
//! Wraps the connection supervisor, the dispatcher and the state tracker
//! behind one small async API.  Dropping the client stops the supervisor.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lumagen_core::{
    Command, CommandOutcome, CommandParams, ConnectionState, DeviceInfo, DeviceState,
    PowerState, ReportError, StateDelta,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use lumagen_core::protocol::reports::MAX_INPUT;
use tracing::{debug, info};

use crate::application::dispatcher::CommandDispatcher;
use crate::application::state_tracker::{StateTracker, SubscriptionId};
use crate::infrastructure::config::{ClientConfig, ConfigError};
use crate::infrastructure::network::ConnectionManager;

/// Error type for client operations that are not plain command outcomes.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no bridge host configured")]
    MissingHost,

    #[error("not connected within {0:?}")]
    ConnectTimeout(Duration),

    /// A query did not produce an answer.
    #[error("command failed: {0}")]
    Command(CommandOutcome),

    /// The answer arrived but could not be parsed.
    #[error("unexpected response: {0}")]
    InvalidResponse(#[from] ReportError),
}

/// Connected (or connecting) Lumagen client.
pub struct LumagenClient {
    manager: Arc<ConnectionManager>,
    dispatcher: Arc<CommandDispatcher>,
    tracker: Arc<StateTracker>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl LumagenClient {
    /// Validates `config` and starts connecting in the background.
    ///
    /// Returns as soon as the supervisor runs; use
    /// [`LumagenClient::wait_until_connected`] to wait for the link.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MissingHost`] or [`ClientError::Config`] for
    /// unusable settings.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        if config.connection.host.trim().is_empty() {
            return Err(ClientError::MissingHost);
        }
        config.validate()?;

        info!(
            host = %config.connection.host,
            port = config.connection.port,
            "starting Lumagen client"
        );
        let tracker = Arc::new(StateTracker::new());
        let manager = Arc::new(ConnectionManager::new(config, Arc::clone(&tracker)));
        let dispatcher = manager.dispatcher();
        let supervisor = manager.spawn();

        Ok(Self {
            manager,
            dispatcher,
            tracker,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// Shorthand for [`LumagenClient::connect`] with default settings.
    ///
    /// # Errors
    ///
    /// See [`LumagenClient::connect`].
    pub fn connect_to(host: impl Into<String>, port: u16) -> Result<Self, ClientError> {
        Self::connect(ClientConfig::for_bridge(host, port))
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    pub async fn send(&self, command: &Command) -> CommandOutcome {
        self.dispatcher.send(command).await
    }

    /// Resolves a catalog id and sends it.  Unknown ids and bad parameters
    /// resolve `Rejected` without touching the wire.
    pub async fn send_command(&self, command_id: &str, params: &CommandParams) -> CommandOutcome {
        match Command::lookup(command_id, params) {
            Ok(command) => self.send(&command).await,
            Err(e) => {
                debug!(command_id, error = %e, "rejecting command");
                CommandOutcome::Rejected(e.to_string())
            }
        }
    }

    /// Powers on unless the device already reports Active.
    pub async fn power_on(&self) -> CommandOutcome {
        if self.tracker.snapshot().power == PowerState::Active {
            debug!("already active; skipping power on");
            return CommandOutcome::Acknowledged(String::new());
        }
        self.send(&Command::power_on()).await
    }

    /// Enters standby, but only from Active.
    pub async fn power_off(&self) -> CommandOutcome {
        let power = self.tracker.snapshot().power;
        if power != PowerState::Active {
            debug!(%power, "not active; skipping standby");
            return CommandOutcome::Acknowledged(String::new());
        }
        self.send(&Command::standby()).await
    }

    pub async fn power_toggle(&self) -> CommandOutcome {
        if self.tracker.snapshot().power == PowerState::Active {
            self.send(&Command::standby()).await
        } else {
            self.send(&Command::power_on()).await
        }
    }

    /// Selects physical input `n` (1..=18).
    pub async fn select_input(&self, n: u8) -> CommandOutcome {
        match Command::select_input(n) {
            Ok(command) => self.send(&command).await,
            Err(e) => CommandOutcome::Rejected(e.to_string()),
        }
    }

    /// Selects the input whose label matches `name`, ignoring case.
    ///
    /// Labels are read after each connect (or via
    /// [`LumagenClient::refresh_labels`]).  An unknown name resolves
    /// `Rejected` without touching the wire.
    pub async fn select_source(&self, name: &str) -> CommandOutcome {
        match self.tracker.snapshot().input_for_label(name) {
            Some(n) => self.select_input(n).await,
            None => CommandOutcome::Rejected(format!("no input labelled {name:?}")),
        }
    }

    /// Shows `text` on the on-screen display for `seconds` (0..=9).
    pub async fn show_message(&self, text: &str, seconds: u8) -> CommandOutcome {
        match Command::display_message(text, seconds) {
            Ok(command) => self.send(&command).await,
            Err(e) => CommandOutcome::Rejected(e.to_string()),
        }
    }

    /// Asks the device for its power state.  The answer also updates the
    /// tracked state.
    pub async fn query_power(&self) -> CommandOutcome {
        self.send(&Command::power_status()).await
    }

    /// Reads model, firmware and serial number.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Command`] if the query is not answered and
    /// [`ClientError::InvalidResponse`] if the answer cannot be parsed.
    pub async fn device_info(&self) -> Result<DeviceInfo, ClientError> {
        match self.send(&Command::device_info()).await {
            CommandOutcome::Acknowledged(payload) => Ok(DeviceInfo::parse(&payload)?),
            other => Err(ClientError::Command(other)),
        }
    }

    /// Reads every input label again and returns the source list, indexed
    /// from input 1.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Command`] for the first label query that is
    /// not answered.
    pub async fn refresh_labels(&self) -> Result<Vec<String>, ClientError> {
        for input in 1..=MAX_INPUT {
            let Ok(query) = Command::input_label(input) else {
                continue;
            };
            match self.send(&query).await {
                // The read task folds the same answer; applying it here
                // makes it visible before this call returns.
                CommandOutcome::Acknowledged(payload) => {
                    self.tracker.apply_response(&payload);
                }
                other => return Err(ClientError::Command(other)),
            }
        }
        Ok(self.tracker.snapshot().input_labels)
    }

    // ── State ─────────────────────────────────────────────────────────────────

    /// Registers a callback for state deltas.  It runs on the read task.
    pub fn subscribe_state_changes<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StateDelta) + Send + Sync + 'static,
    {
        self.tracker.subscribe(Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.tracker.unsubscribe(id)
    }

    pub fn current_state(&self) -> DeviceState {
        self.tracker.snapshot()
    }

    // ── Connection ────────────────────────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    /// Waits until the link is Connected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectTimeout`] if that does not happen within
    /// `timeout`.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut rx = self.manager.watch_state();
        let wait = rx.wait_for(|s| *s == ConnectionState::Connected);
        let connected = matches!(tokio::time::timeout(timeout, wait).await, Ok(Ok(_)));
        if connected {
            Ok(())
        } else {
            Err(ClientError::ConnectTimeout(timeout))
        }
    }

    /// Closes the connection and stops reconnecting.  In-flight commands
    /// resolve `ConnectionUnavailable`.
    pub async fn disconnect(&self) {
        self.manager.shutdown();
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!(error = %e, "supervisor task ended abnormally");
            }
        }
    }
}

impl Drop for LumagenClient {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}
