//! Presence client entry point.
//!
//! Registers this device with a presence server and keeps announcing it until
//! Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! presence-client --server <ADDR> --name <NAME> --kind <KIND> [OPTIONS]
//!
//! Options:
//!   --transport <tcp|http>      Session over TCP, or HTTP polling [default: tcp]
//!   --delay <SECS>              HTTP poll interval [default: 60]
//!   --identity-file <PATH>      Device identity token [default: .info]
//!   --heartbeat <server|client> Which side sends Ping [default: server]
//!   --liveness-secs <SECS>      Close a silent session after this long, 0 = never [default: 15]
//!   --reconnect-secs <SECS>     Reconnect after this long; omit to exit instead
//!   --log-level <LEVEL>         Log level when RUST_LOG is unset [default: info]
//! ```
//!
//! With `--transport http`, `--server` is a base URL such as
//! `http://host:8080`; otherwise it is a `host:port`.
//!
//! Every option can also be set through a `PRESENCE_*` environment variable
//! (`PRESENCE_SERVER`, `PRESENCE_NAME`, ...).
//!
//! Build metadata comes from compile-time variables `PRESENCE_REVISION`,
//! `PRESENCE_BRANCH`, and `PRESENCE_BUILD_TIME` (RFC 3339).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use presence_client::infrastructure::identity::DEFAULT_IDENTITY_FILE;
use presence_client::{
    run_with_reconnect, ClientConfig, FixedDelay, HttpPoller, IdentityStore, NoReconnect,
    ReconnectPolicy,
};
use presence_core::{ClientInfo, HeartbeatInitiator};

const REVISION: Option<&str> = option_env!("PRESENCE_REVISION");
const BRANCH: Option<&str> = option_env!("PRESENCE_BRANCH");
const BUILD_TIME: Option<&str> = option_env!("PRESENCE_BUILD_TIME");

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Tcp,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Heartbeat {
    Server,
    Client,
}

impl From<Heartbeat> for HeartbeatInitiator {
    fn from(value: Heartbeat) -> Self {
        match value {
            Heartbeat::Server => HeartbeatInitiator::Server,
            Heartbeat::Client => HeartbeatInitiator::Client,
        }
    }
}

/// Presence device client.
#[derive(Debug, Parser)]
#[command(
    name = "presence-client",
    about = "Registers this device with a presence server and keeps it alive",
    version
)]
struct Cli {
    /// Server address (`host:port`), or base URL for the HTTP transport.
    #[arg(long, env = "PRESENCE_SERVER")]
    server: String,

    /// Device name reported to the server.
    #[arg(long, env = "PRESENCE_NAME", value_parser = non_empty)]
    name: String,

    /// Device type reported to the server.
    #[arg(long, env = "PRESENCE_KIND", value_parser = non_empty)]
    kind: String,

    #[arg(long, env = "PRESENCE_TRANSPORT", value_enum, default_value_t = Transport::Tcp)]
    transport: Transport,

    /// Seconds between HTTP polls.
    #[arg(long, env = "PRESENCE_DELAY", default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    delay: u64,

    #[arg(long, env = "PRESENCE_IDENTITY_FILE", default_value = DEFAULT_IDENTITY_FILE)]
    identity_file: PathBuf,

    #[arg(long, env = "PRESENCE_HEARTBEAT", value_enum, default_value_t = Heartbeat::Server)]
    heartbeat: Heartbeat,

    /// Seconds without a liveness signal before the session is closed; 0 disables.
    #[arg(long, env = "PRESENCE_LIVENESS_SECS", default_value_t = 15)]
    liveness_secs: u64,

    /// Seconds to wait before reconnecting.  Without it the client exits when
    /// the session ends.
    #[arg(long, env = "PRESENCE_RECONNECT_SECS")]
    reconnect_secs: Option<u64>,

    #[arg(long, env = "PRESENCE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn non_empty(value: &str) -> Result<String, String> {
    if value.trim().is_empty() {
        Err("must not be empty".to_string())
    } else {
        Ok(value.to_string())
    }
}

impl Cli {
    fn client_info(&self, id: String) -> ClientInfo {
        ClientInfo {
            revision: REVISION.unwrap_or_default().to_string(),
            branch: BRANCH.unwrap_or_default().to_string(),
            build_time: parse_build_time(BUILD_TIME),
            ..ClientInfo::new(id, &self.name, &self.kind)
        }
    }

    fn client_config(&self, info: ClientInfo) -> ClientConfig {
        let mut config = ClientConfig::new(&self.server, info);
        config.session.heartbeat_initiator = self.heartbeat.into();
        config.liveness_window = (self.liveness_secs > 0).then(|| Duration::from_secs(self.liveness_secs));
        if let Some(window) = config.liveness_window {
            config.session.liveness_window = window;
        }
        config
    }

    fn reconnect_policy(&self) -> Box<dyn ReconnectPolicy> {
        match self.reconnect_secs {
            Some(secs) => Box::new(FixedDelay::new(Duration::from_secs(secs))),
            None => Box::new(NoReconnect),
        }
    }
}

/// Parses the compile-time build timestamp; anything unusable becomes the epoch.
fn parse_build_time(raw: Option<&str>) -> DateTime<Utc> {
    match raw.map(DateTime::parse_from_rfc3339) {
        Some(Ok(ts)) => ts.with_timezone(&Utc),
        Some(Err(e)) => {
            warn!("ignoring malformed PRESENCE_BUILD_TIME: {e}");
            DateTime::<Utc>::UNIX_EPOCH
        }
        None => DateTime::<Utc>::UNIX_EPOCH,
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let store = IdentityStore::new(&cli.identity_file);
    let id = store
        .load_or_generate()
        .with_context(|| format!("failed to bootstrap identity at {}", store.path().display()))?;
    let info = cli.client_info(id);

    info!(
        "presence client starting: id={}, name={}, kind={}, transport={:?}, server={}",
        info.id, info.name, info.kind, cli.transport, cli.server
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                shutdown_tx.send_replace(true);
            }
            Err(e) => {
                error!("failed to listen for Ctrl+C signal: {e}");
                std::future::pending::<()>().await;
            }
        }
    });

    match cli.transport {
        Transport::Tcp => {
            let config = cli.client_config(info);
            let mut policy = cli.reconnect_policy();
            run_with_reconnect(&config, &mut policy, shutdown_rx)
                .await
                .with_context(|| format!("presence session with {} ended", cli.server))?;
        }
        Transport::Http => {
            let poller = HttpPoller::new(&cli.server, &info, Duration::from_secs(cli.delay))
                .context("failed to set up HTTP polling")?;
            poller.run(shutdown_rx).await;
        }
    }

    info!("presence client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
