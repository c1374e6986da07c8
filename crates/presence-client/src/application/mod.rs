//! Application layer for the client.
//!
//! - **`reconnect`** – Decides whether, and after how long, the client dials
//!   the server again once a session has ended.  The network layer asks a
//!   [`ReconnectPolicy`](reconnect::ReconnectPolicy) and never hard-codes a
//!   retry strategy of its own.

pub mod reconnect;
