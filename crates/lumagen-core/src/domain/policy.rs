//! Retry, backoff and liveness policies as pure functions.
//!
//! Nothing here touches a socket or a clock; the client feeds in attempt and
//! miss counters and acts on the returned decision.  That keeps the timing
//! rules testable in isolation.

use std::time::Duration;

/// Exponential reconnect backoff: `initial * 2^(attempt-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based).
    ///
    /// Attempt 0 means "first connect" and has no delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let shift = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << shift;
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Whether a timed-out command should be sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

/// Command retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Decision after `attempts_made` failed attempts (1 = the first send).
    pub fn decide(&self, attempts_made: u32) -> RetryDecision {
        if attempts_made <= self.max_retries {
            RetryDecision::Retry
        } else {
            RetryDecision::GiveUp
        }
    }

    /// Total number of sends the policy allows.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Per-command timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    /// How long to wait for the device to echo the command.
    pub echo: Duration,
    /// How long to wait for a query response after the echo.
    pub response: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            echo: Duration::from_millis(500),
            response: Duration::from_secs(2),
        }
    }
}

/// Upper bound on how long a single `send` can take, write time excluded.
pub fn worst_case_resolution(timeouts: CommandTimeouts, retry: RetryPolicy) -> Duration {
    (timeouts.echo + timeouts.response).saturating_mul(retry.total_attempts())
}

/// Health verdict after a run of missed liveness probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    Healthy,
    Degraded,
    GiveUp,
}

/// Missed-probe thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    /// Consecutive misses that mark the link Degraded.
    pub degrade_after: u32,
    /// Consecutive misses that drop the connection.
    pub give_up_after: u32,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            degrade_after: 1,
            give_up_after: 3,
        }
    }
}

impl LivenessPolicy {
    pub fn verdict(&self, consecutive_misses: u32) -> LivenessVerdict {
        if consecutive_misses >= self.give_up_after.max(1) {
            LivenessVerdict::GiveUp
        } else if consecutive_misses >= self.degrade_after.max(1) {
            LivenessVerdict::Degraded
        } else {
            LivenessVerdict::Healthy
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
