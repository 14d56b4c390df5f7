//! # lumagen-core
//!
//! Protocol and domain layer for talking to a Lumagen Radiance Pro video
//! processor through a Global Caché IP2SL serial-to-TCP bridge.
//!
//! The crate does no I/O.  It turns bytes into frames, frames into classified
//! messages, reports into device-state changes, and command ids into bytes.
//! The `lumagen-client` crate drives these pieces from a tokio socket.
//!
//! # Layout (for beginners)
//!
//! - **`protocol`**: the wire.  [`Framer`] cuts the stream at `\r`,
//!   [`Classifier`] decides what each frame is, `reports` parses device
//!   output, `commands` holds the command catalog.
//! - **`domain`**: the rules.  Connection and power lifecycles, command
//!   outcomes, and retry/backoff/liveness policies.

pub mod domain;
pub mod protocol;

pub use domain::connection::ConnectionState;
pub use domain::device_info::DeviceInfo;
pub use domain::device_state::{ApplyResult, DeviceState, PowerState, StateChange, StateDelta};
pub use domain::outcome::{CommandOutcome, FailureKind, PendingCommand, TimeoutStage};
pub use domain::policy::{
    BackoffPolicy, CommandTimeouts, LivenessPolicy, LivenessVerdict, RetryDecision, RetryPolicy,
};
pub use protocol::classifier::{ClassifiedMessage, Classifier, MessageKind};
pub use protocol::commands::{Acknowledgement, Command, CommandError, CommandParams};
pub use protocol::framer::{Framer, FramerConfig, FramingError, RawFrame};
pub use protocol::reports::{Report, ReportError, SourceMode};
pub use protocol::sequence::SequenceCounter;
