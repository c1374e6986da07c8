//! Reconnect policies.
//!
//! After a session ends (or a dial fails) the client asks its policy for the
//! delay before the next attempt.  `attempt` counts consecutive attempts since
//! the last session that got through the handshake, starting at 1.

use std::time::Duration;

/// Decides whether to dial again after a session ends.
#[cfg_attr(test, mockall::automock)]
pub trait ReconnectPolicy: Send {
    /// Returns the delay before attempt number `attempt`, or `None` to stop.
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;
}

/// Never reconnects.  The client stops after its first session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Reconnects forever, waiting the same delay before every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        Some(self.delay)
    }
}

impl<P: ReconnectPolicy + ?Sized> ReconnectPolicy for Box<P> {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        (**self).next_delay(attempt)
    }
}
