//! Liveness deadline tracking.
//!
//! A session is alive until its deadline.  Every liveness signal (a `Pong`, or
//! a `Ping` when the peer is the heartbeat initiator) pushes the deadline to
//! `now + window`.  The tracker is driven by `tokio::time::Instant` so paused
//! test clocks control it.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct LivenessTracker {
    window: Duration,
    deadline: Instant,
}

impl LivenessTracker {
    /// Starts tracking at `now`; the first deadline is `now + window`.
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            deadline: now + window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Records a liveness signal observed at `now`.
    ///
    /// The deadline never moves backwards.
    pub fn extend(&mut self, now: Instant) {
        let candidate = now + self.window;
        if candidate > self.deadline {
            self.deadline = candidate;
        }
    }

    /// `true` once `now` has reached the deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}
