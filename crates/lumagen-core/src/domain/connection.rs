//! Connection lifecycle states and the allowed transitions between them.
//!
//! ```text
//!                 ┌──────────── give up ─────────────┐
//!                 v                                  │
//! Disconnected ──> Connecting ──> Connected ──> Degraded
//!      ^               │              │  ^           │
//!      │            failed          lost └─ answered ┘
//!      └───────────────┴──────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the transport link as seen by the rest of the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Socket open but liveness probes are going unanswered.
    Degraded,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal edge of the lifecycle.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Degraded)
                | (Connected, Disconnected)
                | (Degraded, Connected)
                | (Degraded, Disconnected)
        )
    }

    /// Caller commands are only accepted on a healthy link.
    pub fn accepts_commands(self) -> bool {
        self == ConnectionState::Connected
    }

    /// Liveness probes are also allowed while degraded.
    pub fn accepts_probes(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}
