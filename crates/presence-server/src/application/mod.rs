//! Application layer for the presence server.
//!
//! - **`registry`** – The in-memory table of active device sessions, keyed by
//!   device id, with the duplicate-id policy and change notifications.
//!
//! Nothing here opens sockets or touches the file system.

pub mod registry;
