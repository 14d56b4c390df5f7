//! TOML configuration for the client.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration that only lacks the bridge address.  Durations are
//! stored as integer milliseconds.
//!
//! ```toml
//! [connection]
//! host = "192.168.1.40"
//! port = 4999
//! connect_timeout_ms = 5000
//! backoff_initial_ms = 1000
//! backoff_max_ms = 60000
//! probe_interval_ms = 30000
//! degrade_after_misses = 1
//! give_up_after_misses = 3
//! fetch_labels_on_connect = true
//!
//! [commands]
//! echo_timeout_ms = 500
//! response_timeout_ms = 2000
//! max_retries = 1
//!
//! [framing]
//! max_frame_len = 1024
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use lumagen_core::protocol::framer::{FramerConfig, DEFAULT_MAX_FRAME_LEN};
use lumagen_core::{BackoffPolicy, CommandTimeouts, LivenessPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// TCP port of the IP2SL serial bridge.
pub const DEFAULT_BRIDGE_PORT: u16 = 4999;

/// Error type for loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but makes no sense.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub framing: FramingConfig,
}

/// Where the bridge is and how hard to try reaching it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Bridge hostname or IP address.  Empty until set.
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Period of the alive query while connected.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_degrade_after_misses")]
    pub degrade_after_misses: u32,
    #[serde(default = "default_give_up_after_misses")]
    pub give_up_after_misses: u32,
    /// Query the input labels after each connect.  Power is always queried.
    #[serde(default = "default_fetch_labels_on_connect")]
    pub fetch_labels_on_connect: bool,
}

/// Per-command timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandConfig {
    #[serde(default = "default_echo_timeout_ms")]
    pub echo_timeout_ms: u64,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Resends after the first attempt times out.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Receive-side framing limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FramingConfig {
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_port() -> u16 {
    DEFAULT_BRIDGE_PORT
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_backoff_initial_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    60_000
}
fn default_probe_interval_ms() -> u64 {
    30_000
}
fn default_degrade_after_misses() -> u32 {
    1
}
fn default_give_up_after_misses() -> u32 {
    3
}
fn default_fetch_labels_on_connect() -> bool {
    true
}
fn default_echo_timeout_ms() -> u64 {
    500
}
fn default_response_timeout_ms() -> u64 {
    2_000
}
fn default_max_retries() -> u32 {
    1
}
fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            degrade_after_misses: default_degrade_after_misses(),
            give_up_after_misses: default_give_up_after_misses(),
            fetch_labels_on_connect: default_fetch_labels_on_connect(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            echo_timeout_ms: default_echo_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_frame_len: default_max_frame_len(),
        }
    }
}

// ── Loading and derived policies ──────────────────────────────────────────────

impl ClientConfig {
    /// Default settings pointed at `host:port`.
    pub fn for_bridge(host: impl Into<String>, port: u16) -> Self {
        let mut cfg = Self::default();
        cfg.connection.host = host.into();
        cfg.connection.port = port;
        cfg
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: ClientConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`ClientConfig::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks value ranges.  The host may still be empty here; the client
    /// refuses to connect without one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.connection;
        if c.port == 0 {
            return Err(invalid("connection.port", "must be non-zero"));
        }
        if c.connect_timeout_ms == 0 {
            return Err(invalid("connection.connect_timeout_ms", "must be non-zero"));
        }
        if c.backoff_initial_ms == 0 || c.backoff_initial_ms > c.backoff_max_ms {
            return Err(invalid(
                "connection.backoff_initial_ms",
                "must be non-zero and not above backoff_max_ms",
            ));
        }
        if c.probe_interval_ms == 0 {
            return Err(invalid("connection.probe_interval_ms", "must be non-zero"));
        }
        if c.degrade_after_misses == 0 || c.give_up_after_misses < c.degrade_after_misses {
            return Err(invalid(
                "connection.give_up_after_misses",
                "thresholds must satisfy 0 < degrade_after_misses <= give_up_after_misses",
            ));
        }
        if self.commands.echo_timeout_ms == 0 {
            return Err(invalid("commands.echo_timeout_ms", "must be non-zero"));
        }
        if self.commands.response_timeout_ms == 0 {
            return Err(invalid("commands.response_timeout_ms", "must be non-zero"));
        }
        if self.framing.max_frame_len == 0 {
            return Err(invalid("framing.max_frame_len", "must be non-zero"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.connect_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.connection.probe_interval_ms)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.connection.backoff_initial_ms),
            max: Duration::from_millis(self.connection.backoff_max_ms),
        }
    }

    pub fn liveness(&self) -> LivenessPolicy {
        LivenessPolicy {
            degrade_after: self.connection.degrade_after_misses,
            give_up_after: self.connection.give_up_after_misses,
        }
    }

    pub fn timeouts(&self) -> CommandTimeouts {
        CommandTimeouts {
            echo: Duration::from_millis(self.commands.echo_timeout_ms),
            response: Duration::from_millis(self.commands.response_timeout_ms),
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.commands.max_retries,
        }
    }

    pub fn framer(&self) -> FramerConfig {
        FramerConfig {
            max_frame_len: self.framing.max_frame_len,
            ..FramerConfig::default()
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
