//! Session-level domain types with no I/O: timing configuration and the
//! liveness deadline.

pub mod config;
pub mod liveness;

pub use config::SessionConfig;
pub use liveness::LivenessTracker;
