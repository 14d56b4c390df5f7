//! Lock-free counter that hands out command ids.
//!
//! Every command written to the device gets an id so log lines for the same
//! command (write, echo, response, retry) can be correlated.  The wire format
//! carries no ids; they exist only on this side of the socket.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic id source, shared between the dispatcher and the liveness task.
///
/// Ids start at 1 so that 0 can mean "no command" in logs.
#[derive(Debug)]
pub struct SequenceCounter {
    next: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Takes the next id.  Wraps at `u64::MAX` without panicking.
    pub fn next(&self) -> u64 {
        // Relaxed: ids only need to be unique, not to order other memory.
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Id the next call will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
