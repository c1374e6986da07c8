//! presence-client library entry point.
//!
//! Re-exports the public modules so the binary in `main.rs` and the
//! integration tests in `tests/` share the same module tree.
//!
//! The client registers this device with a presence server and then proves
//! it is still there:
//!
//! 1. Loads (or creates) the device's identity token.
//! 2. Dials the server and answers its `HelloRequest` with a `HelloResponse`
//!    carrying [`ClientInfo`](presence_core::ClientInfo).
//! 3. Once approved, answers every `Ping` with `Pong`, or sends its own pings
//!    when configured as the heartbeat initiator.
//! 4. When the session ends, asks its reconnect policy whether to dial again.

/// Application layer: reconnect policy.
pub mod application;

/// Infrastructure layer: identity file, TCP session, HTTP polling.
pub mod infrastructure;

pub use application::reconnect::{FixedDelay, NoReconnect, ReconnectPolicy};
pub use infrastructure::http::{HttpError, HttpPoller};
pub use infrastructure::identity::{IdentityError, IdentityStore};
pub use infrastructure::network::{
    run_with_reconnect, ClientConfig, ClientError, ClientSession, ShutdownHandle,
};
