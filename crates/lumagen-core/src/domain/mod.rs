//! Domain types for the Lumagen client.
//!
//! Plain data and pure rules: connection and power lifecycles, command
//! outcomes, and the retry/backoff/liveness policies.  Nothing here opens a
//! socket or reads a clock beyond stamping `Instant`s, so every rule can be
//! unit-tested on its own.

pub mod connection;
pub mod device_info;
pub mod device_state;
pub mod outcome;
pub mod policy;
