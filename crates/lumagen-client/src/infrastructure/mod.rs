//! Infrastructure layer for the client.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `lumagen_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`config`** – TOML settings with defaults for every field.
//! - **`network`** – TCP session with the bridge: connect, read loop,
//!   liveness probing, reconnect with backoff.
//! - **`discovery`** – Finds an IP2SL on the LAN from its multicast beacon and
//!   checks that a Lumagen answers behind it.

pub mod config;
pub mod discovery;
pub mod network;
