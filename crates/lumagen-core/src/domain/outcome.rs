//! Command outcomes, the failure taxonomy, and the in-flight command record.

use std::fmt;
use std::time::{Duration, Instant};

/// Which wait expired when a command timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// The device never echoed the command.  Usually means echo mode is off.
    Echo,
    /// The echo arrived but the query answer did not.
    Response,
}

/// How a `send` resolved.  Every send resolves to exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The device acknowledged; carries the echo or response text.
    Acknowledged(String),
    /// All attempts timed out; carries the stage of the last failure.
    TimedOut(TimeoutStage),
    /// Refused before anything was written.
    Rejected(String),
    /// The link was not usable, or dropped while the command was in flight.
    ConnectionUnavailable,
}

impl CommandOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, CommandOutcome::Acknowledged(_))
    }

    /// Payload of an acknowledged command.
    pub fn payload(&self) -> Option<&str> {
        match self {
            CommandOutcome::Acknowledged(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Acknowledged(p) => write!(f, "acknowledged ({p})"),
            CommandOutcome::TimedOut(TimeoutStage::Echo) => {
                f.write_str("timed out waiting for echo")
            }
            CommandOutcome::TimedOut(TimeoutStage::Response) => {
                f.write_str("timed out waiting for response")
            }
            CommandOutcome::Rejected(reason) => write!(f, "rejected: {reason}"),
            CommandOutcome::ConnectionUnavailable => f.write_str("connection unavailable"),
        }
    }
}

/// Failure categories used in logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Frame cap exceeded; partial data discarded.
    FramingOverflow,
    /// A frame matched no rule.  Never fatal.
    ClassificationUnknown,
    /// Echo never arrived; echo mode is probably misconfigured.
    EchoTimeout,
    /// Device slow or command unsupported.
    ResponseTimeout,
    /// The transport failed.
    ConnectionLost,
    /// A command was attempted while not connected.
    ConnectionUnavailable,
}

impl From<TimeoutStage> for FailureKind {
    fn from(stage: TimeoutStage) -> Self {
        match stage {
            TimeoutStage::Echo => FailureKind::EchoTimeout,
            TimeoutStage::Response => FailureKind::ResponseTimeout,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::FramingOverflow => "framing overflow",
            FailureKind::ClassificationUnknown => "unclassified frame",
            FailureKind::EchoTimeout => "echo timeout",
            FailureKind::ResponseTimeout => "response timeout",
            FailureKind::ConnectionLost => "connection lost",
            FailureKind::ConnectionUnavailable => "connection unavailable",
        };
        f.write_str(s)
    }
}

/// The single command currently awaiting its echo or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub id: u64,
    /// Bytes written, terminator included.
    pub raw_bytes_sent: Vec<u8>,
    pub issued_at: Instant,
    /// Text the echo must match exactly.
    pub expected_echo: String,
    /// Prefix of the response, for queries.
    pub expected_response: Option<&'static str>,
    /// Timeout of the stage currently awaited.
    pub timeout: Duration,
    pub retries_remaining: u32,
}
