//! Presence server entry point.
//!
//! Accepts device connections, runs the registration handshake, and keeps
//! each registered device's session alive with heartbeats until the device
//! goes quiet or disconnects.
//!
//! # Usage
//!
//! ```text
//! presence-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>   TOML config file [default: platform config dir]
//!   --listen <ADDR>   Listen address, overrides `server.listen_addr`
//! ```
//!
//! | Variable            | Description                         |
//! |---------------------|-------------------------------------|
//! | `PRESENCE_CONFIG`   | Same as `--config`                  |
//! | `PRESENCE_LISTEN`   | Same as `--listen`                  |
//! | `RUST_LOG`          | Log filter, overrides `log_level`   |

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use presence_server::infrastructure::storage::config::{load_config, ServerConfig};
use presence_server::{Server, SessionRegistry};

/// How long to wait for sessions to close after the shutdown signal.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Presence device-registration server.
#[derive(Debug, Parser)]
#[command(
    name = "presence-server",
    about = "Accepts device registrations and tracks their liveness",
    version
)]
struct Cli {
    /// Path to the TOML config file.  Missing file means defaults.
    #[arg(long, env = "PRESENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. `0.0.0.0:9999`.
    #[arg(long, env = "PRESENCE_LISTEN")]
    listen: Option<String>,
}

impl Cli {
    /// Applies CLI overrides on top of the file config.
    fn apply_overrides(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(listen) = &self.listen {
            config.server.listen_addr = listen.clone();
        }
        config
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config = load_config(cli.config.as_deref()).context("failed to load server config")?;
    let config = cli.apply_overrides(file_config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    let session_config = config
        .session
        .to_session_config()
        .context("invalid [session] config")?;
    let registry = SessionRegistry::new(config.session.duplicate_id_policy);

    let server = Server::bind(&config.server.listen_addr, session_config, registry.clone())
        .await
        .with_context(|| format!("failed to start server on {}", config.server.listen_addr))?;

    info!(
        "presence server starting: listen={}, ping={}s, window={}s, initiator={:?}",
        config.server.listen_addr,
        config.session.ping_interval_secs,
        config.session.liveness_window_secs,
        config.session.heartbeat_initiator,
    );

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                shutdown_tx.send_replace(true);
            }
            Err(e) => {
                error!("failed to listen for Ctrl+C signal: {e}");
                // Keep the sender alive so the server keeps running.
                std::future::pending::<()>().await;
            }
        }
    });

    server.run(shutdown_rx).await;

    // The accept loop is gone; now stop every live session.
    let handles = registry.shutdown_all().await;
    let drain = async {
        for handle in &handles {
            handle.closed().await;
        }
    };
    if tokio::time::timeout(SESSION_DRAIN_TIMEOUT, drain).await.is_err() {
        warn!("some sessions did not close within {SESSION_DRAIN_TIMEOUT:?}");
    }

    info!("presence server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
