//! TCP listener and accept loop.
//!
//! [`Server::run`] accepts connections until the external shutdown signal
//! flips.  Each accepted socket is handed to
//! [`serve_connection`](super::device_session::serve_connection) on its own
//! task; the loop itself never awaits a handshake.
//!
//! The shutdown signal also reaches connections still in their handshake.
//! Stopping the loop does not stop active sessions; the owner of the process
//! calls [`SessionRegistry::shutdown_all`] for that.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use presence_core::{shutdown_requested, SessionConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::application::registry::SessionRegistry;
use crate::infrastructure::network::device_session::serve_connection;
use crate::infrastructure::network::ServerError;

/// Pause after a failed `accept` (e.g. EMFILE) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound listener plus the shared state every session needs.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    config: Arc<SessionConfig>,
    registry: SessionRegistry,
}

impl Server {
    /// Binds `addr` (e.g. `"0.0.0.0:9999"`).
    ///
    /// # Errors
    ///
    /// [`ServerError::Listen`] if the address cannot be bound.
    pub async fn bind(
        addr: &str,
        config: SessionConfig,
        registry: SessionRegistry,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Listen {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            registry,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The registry sessions are added to.  Clones share the same table.
    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Accepts connections until `shutdown` becomes `true` (or its sender is
    /// dropped), then drops the listener and returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        match self.local_addr() {
            Ok(addr) => info!("listening on {addr}"),
            Err(e) => warn!("listening on an unknown address: {e}"),
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown) => {
                    info!("shutdown signal received; no longer accepting connections");
                    break;
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer, shutdown.clone()),
                    Err(e) => {
                        error!("accept error: {e}");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, shutdown: watch::Receiver<bool>) {
        debug!(%peer, "accepted connection");
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "could not set TCP_NODELAY: {e}");
        }

        let config = Arc::clone(&self.config);
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            match serve_connection(read_half, write_half, Some(peer), config, registry, shutdown).await {
                Ok(()) => debug!(%peer, "connection finished"),
                Err(e) => debug!(%peer, "connection finished with error: {e}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::DuplicateIdPolicy;

    #[tokio::test]
    async fn test_bind_on_ephemeral_port_reports_local_addr() {
        let server = Server::bind("127.0.0.1:0", SessionConfig::default(), SessionRegistry::default())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_listen_error() {
        let first = Server::bind("127.0.0.1:0", SessionConfig::default(), SessionRegistry::default())
            .await
            .unwrap();
        let taken = first.local_addr().unwrap().to_string();

        let err = Server::bind(&taken, SessionConfig::default(), SessionRegistry::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Listen { addr, .. } if addr == taken));
    }

    #[tokio::test]
    async fn test_run_returns_on_shutdown_signal() {
        let registry = SessionRegistry::new(DuplicateIdPolicy::Reject);
        let server = Server::bind("127.0.0.1:0", SessionConfig::default(), registry)
            .await
            .unwrap();
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(server.run(rx));
        tx.send_replace(true);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("run must return promptly")
            .unwrap();
    }
}
