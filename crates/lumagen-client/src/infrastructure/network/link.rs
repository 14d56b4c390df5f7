//! Published connection state.
//!
//! A `tokio::sync::watch` channel holds the current [`ConnectionState`].
//! Every transition is checked against the lifecycle table and logged;
//! illegal ones are dropped.

use lumagen_core::ConnectionState;
use tokio::sync::watch;
use tracing::{info, warn};

/// Sole writer of the connection state.
pub struct LinkState {
    tx: watch::Sender<ConnectionState>,
}

impl LinkState {
    /// Starts Disconnected.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Moves to `next` if the edge is legal.  Returns whether the state
    /// changed.
    pub fn set(&self, next: ConnectionState) -> bool {
        let mut from = next;
        let changed = self.tx.send_if_modified(|state| {
            from = *state;
            if *state == next || !state.can_transition_to(next) {
                return false;
            }
            *state = next;
            true
        });

        if changed {
            info!(%from, to = %next, "connection state changed");
        } else if from != next {
            warn!(%from, to = %next, "ignoring illegal connection transition");
        }
        changed
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}
