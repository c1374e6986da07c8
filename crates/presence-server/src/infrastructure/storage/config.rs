//! TOML-based configuration for the presence server.
//!
//! Reads and writes [`ServerConfig`] from an explicit path or from the
//! platform-appropriate config file:
//! - Windows:  `%APPDATA%\Presence\server.toml`
//! - Linux:    `~/.config/presence/server.toml` (or `$XDG_CONFIG_HOME`)
//! - macOS:    `~/Library/Application Support/Presence/server.toml`
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:9999"
//! log_level = "info"
//!
//! [session]
//! ping_interval_secs = 5
//! liveness_window_secs = 15
//! handshake_timeout_secs = 5
//! heartbeat_initiator = "server"
//! unknown_type_policy = "log_and_skip"
//! duplicate_id_policy = "replace"
//! ```
//!
//! Every field has a `#[serde(default = "...")]`, so a missing file, a missing
//! section, or a missing key all fall back to the defaults above.

use std::path::{Path, PathBuf};
use std::time::Duration;

use presence_core::{HeartbeatInitiator, SessionConfig, UnknownTypePolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::registry::DuplicateIdPolicy;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but makes no sense (e.g. a zero ping interval).
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenerSection,
    #[serde(default)]
    pub session: SessionSection,
}

/// Where to listen and how loudly to log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenerSection {
    /// `host:port` to bind the TCP listener to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Heartbeat timing and protocol policies, in whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSection {
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_liveness_window_secs")]
    pub liveness_window_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default)]
    pub heartbeat_initiator: HeartbeatInitiator,
    #[serde(default)]
    pub unknown_type_policy: UnknownTypePolicy,
    #[serde(default)]
    pub duplicate_id_policy: DuplicateIdPolicy,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_listen_addr() -> String {
    "0.0.0.0:9999".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_ping_interval_secs() -> u64 {
    5
}
fn default_liveness_window_secs() -> u64 {
    15
}
fn default_handshake_timeout_secs() -> u64 {
    5
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            liveness_window_secs: default_liveness_window_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            heartbeat_initiator: HeartbeatInitiator::default(),
            unknown_type_policy: UnknownTypePolicy::default(),
            duplicate_id_policy: DuplicateIdPolicy::default(),
        }
    }
}

impl SessionSection {
    /// Converts the on-disk form into the runtime [`SessionConfig`].
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when a duration is zero or the liveness window
    /// is not longer than the ping interval.
    pub fn to_session_config(&self) -> Result<SessionConfig, ConfigError> {
        for (field, value) in [
            ("session.ping_interval_secs", self.ping_interval_secs),
            ("session.liveness_window_secs", self.liveness_window_secs),
            ("session.handshake_timeout_secs", self.handshake_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be at least 1 second".to_string(),
                });
            }
        }
        if self.liveness_window_secs <= self.ping_interval_secs {
            return Err(ConfigError::Invalid {
                field: "session.liveness_window_secs",
                reason: format!(
                    "{}s window would expire before the next {}s ping",
                    self.liveness_window_secs, self.ping_interval_secs
                ),
            });
        }

        Ok(SessionConfig {
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            liveness_window: Duration::from_secs(self.liveness_window_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            heartbeat_initiator: self.heartbeat_initiator,
            unknown_type_policy: self.unknown_type_policy,
            ..SessionConfig::default()
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("server.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `path`, or from [`config_file_path`] when `path` is
/// `None`.  A missing file yields `ServerConfig::default()`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Presence"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("presence"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Presence")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
