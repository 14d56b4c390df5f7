//! Application layer for the client.
//!
//! - **`dispatcher`** – Owns the single command slot.  Writes a command,
//!   waits for its echo (and for queries, its response), retries on timeout,
//!   and resolves exactly one [`CommandOutcome`](lumagen_core::CommandOutcome).
//!   The socket is reached through the [`FrameWriter`](dispatcher::FrameWriter)
//!   trait so tests can substitute a recorder.
//!
//! - **`state_tracker`** – Folds unsolicited reports into the device-state
//!   snapshot and publishes coalesced deltas to subscribers.

pub mod dispatcher;
pub mod state_tracker;
