//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML file from `--config` or the
//! platform config directory, falls back to defaults when it does not exist,
//! and converts the on-disk form into the runtime `SessionConfig`.

pub mod config;
