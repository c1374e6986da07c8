//! Infrastructure layer for the presence server.
//!
//! Contains the OS-facing adapters: the TCP listener and per-connection
//! session loops, and TOML configuration storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `presence_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
