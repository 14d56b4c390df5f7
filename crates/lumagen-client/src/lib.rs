//! lumagen-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does lumagen-client do? (for beginners)
//!
//! A Lumagen Radiance Pro video processor is controlled over RS-232.  A
//! Global Caché IP2SL bridges that serial port to TCP port 4999, so the
//! client simply opens a TCP connection and exchanges short text lines:
//!
//! 1. Commands go out as ASCII terminated by `\r` (`Z1` powers on, `ZQS02`
//!    asks for the power state).
//! 2. The device echoes every command, answers queries with `!Sxx,...`
//!    lines, and pushes reports (`Z1Active`, `!I00,3`) whenever its state
//!    changes.
//! 3. The client matches echoes and answers to the one command in flight,
//!    folds reports into a [`DeviceState`](lumagen_core::DeviceState)
//!    snapshot, and notifies subscribers.
//!
//! Start with [`LumagenClient`].

/// Application layer: command dispatch and state tracking.
pub mod application;

/// Public client handle.
pub mod client;

/// Infrastructure layer: config, TCP session and bridge discovery.
pub mod infrastructure;

pub use application::dispatcher::{CommandDispatcher, FrameWriter, SlotStage, WriteError};
pub use application::state_tracker::{StateCallback, StateTracker, SubscriptionId};
pub use client::{ClientError, LumagenClient};
pub use infrastructure::config::{ClientConfig, ConfigError};
pub use infrastructure::discovery::discover_bridge;
