//! Pure size-and-time batching state, decoupled from the database and the
//! socket wait so the flush conditions (spec.md §4.5) can be unit tested
//! without a live Postgres connection.

use std::time::{Duration, Instant};

/// What the dispatch loop should do on this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    /// A flush condition was reached; dequeue with this limit.
    Flush { limit: u32 },
    /// Wait on the socket for up to this long before re-evaluating.
    Wait { remaining: Duration },
}

/// Tracks the notification counter and the current batch's start time.
///
/// `batch_start` is always a concrete `Instant`, not an `Option`: per
/// spec.md §3 it is set on the zero-to-one counter transition, on every
/// flush, and on timeout expiry, so there is always a well-defined
/// deadline to measure remaining wait time against even while the counter
/// sits at zero.
pub struct BatchClock {
    counter: u32,
    batch_start: Instant,
}

impl BatchClock {
    pub fn new(now: Instant) -> Self {
        Self {
            counter: 0,
            batch_start: now,
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Records `n` freshly observed notifications. Sets the batch-start
    /// timer only on the zero-to-one transition, per spec.md §3.
    pub fn record_notifications(&mut self, n: u32, now: Instant) {
        if n == 0 {
            return;
        }
        if self.counter == 0 {
            self.batch_start = now;
        }
        self.counter += n;
    }

    /// Resets the counter and batch-start timer after a successful flush.
    pub fn reset(&mut self, now: Instant) {
        self.counter = 0;
        self.batch_start = now;
    }

    /// Resets the batch-start timer on socket-wait timeout expiry, per
    /// spec.md §4.5 ("Timeout: reset the batch-start timer"). Only rebases
    /// while the counter is idle (zero) — rebasing with a partial batch
    /// still pending would push the deadline out indefinitely and make
    /// flush condition 2 unreachable except by hitting the size bound.
    pub fn on_timeout_expiry(&mut self, now: Instant) {
        if self.counter == 0 {
            self.batch_start = now;
        }
    }

    /// Evaluates the three flush conditions in spec.md §4.5, in order:
    /// size bound, then elapsed timeout, then bounded wait.
    pub fn decide(&self, now: Instant, batch_limit: u32, timeout: Duration) -> FlushDecision {
        if self.counter >= batch_limit {
            return FlushDecision::Flush {
                limit: self.counter,
            };
        }

        let elapsed = now.saturating_duration_since(self.batch_start);
        if self.counter > 0 && elapsed >= timeout {
            return FlushDecision::Flush {
                limit: self.counter,
            };
        }

        FlushDecision::Wait {
            remaining: timeout.saturating_sub(elapsed),
        }
    }
}
