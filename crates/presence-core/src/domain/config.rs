//! Session timing and policy configuration.
//!
//! [`SessionConfig`] is the runtime form shared by both roles.  The server
//! builds it from its TOML file; the client builds it from CLI flags.  Neither
//! reads the environment from here.

use std::time::Duration;

use crate::protocol::dispatch::{HeartbeatInitiator, UnknownTypePolicy};

/// Timing and policy knobs for one session.
///
/// # Example
///
/// ```rust
/// use presence_core::SessionConfig;
///
/// let cfg = SessionConfig::default();
/// assert_eq!(cfg.ping_interval.as_secs(), 5);
/// assert_eq!(cfg.liveness_window.as_secs(), 15);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How often the heartbeat initiator sends `Ping`.
    pub ping_interval: Duration,

    /// How long a session stays alive after the last liveness signal.
    pub liveness_window: Duration,

    /// Upper bound on the whole Hello / Registration / Approval exchange.
    pub handshake_timeout: Duration,

    pub heartbeat_initiator: HeartbeatInitiator,

    pub unknown_type_policy: UnknownTypePolicy,

    /// How long a closing session lets its writer flush before shutting down
    /// the write half.
    pub writer_grace: Duration,
}

impl Default for SessionConfig {
    /// | Field               | Default      |
    /// |---------------------|--------------|
    /// | ping_interval       | 5 seconds    |
    /// | liveness_window     | 15 seconds   |
    /// | handshake_timeout   | 5 seconds    |
    /// | heartbeat_initiator | `Server`     |
    /// | unknown_type_policy | `LogAndSkip` |
    /// | writer_grace        | 1 second     |
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(5),
            liveness_window: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(5),
            heartbeat_initiator: HeartbeatInitiator::default(),
            unknown_type_policy: UnknownTypePolicy::default(),
            writer_grace: Duration::from_secs(1),
        }
    }
}
