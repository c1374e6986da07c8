//! Infrastructure layer for the client.
//!
//! - **`identity`** – File-backed device id, created on first run.
//! - **`network`** – TCP session with the presence server: handshake,
//!   heartbeats, reconnect loop.
//! - **`http`** – Alternative transport that announces the device by
//!   periodic HTTP POSTs instead of a persistent connection.

pub mod http;
pub mod identity;
pub mod network;
