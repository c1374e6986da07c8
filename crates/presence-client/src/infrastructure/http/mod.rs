//! HTTP polling transport.
//!
//! For deployments without a persistent connection the client can instead
//! POST its [`ClientInfo`] as JSON to `<base>/api/v1/ping`, once right away
//! and then every `delay`.  Each request is bounded by `delay` as well.  A
//! failed request or a non-200 answer is logged; the loop carries on until
//! shutdown.

use std::time::Duration;

use presence_core::{shutdown_requested, ClientInfo};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Path appended to the base URL.
pub const PING_PATH: &str = "/api/v1/ping";

/// Default time between polls.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("poll delay must be greater than zero")]
    ZeroDelay,

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to encode client info: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("expected 200 from {url}, got {status}")]
    Status { url: String, status: StatusCode },
}

/// Periodically announces this device over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPoller {
    client: reqwest::Client,
    url: String,
    body: Vec<u8>,
    delay: Duration,
}

impl HttpPoller {
    /// Builds a poller for `base` (e.g. `http://host:8080`, trailing `/` allowed).
    ///
    /// The body is encoded once here; `info` does not change between polls.
    pub fn new(base: &str, info: &ClientInfo, delay: Duration) -> Result<Self, HttpError> {
        if delay.is_zero() {
            return Err(HttpError::ZeroDelay);
        }
        let client = reqwest::Client::builder()
            .timeout(delay)
            .build()
            .map_err(HttpError::Client)?;

        Ok(Self {
            client,
            url: ping_url(base),
            body: serde_json::to_vec(info)?,
            delay,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sends one ping and drains the response body.
    ///
    /// # Errors
    ///
    /// [`HttpError::Request`] for transport failures and timeouts,
    /// [`HttpError::Status`] for anything but `200 OK`.
    pub async fn ping_once(&self) -> Result<(), HttpError> {
        let request_err = |source| HttpError::Request {
            url: self.url.clone(),
            source,
        };

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(self.body.clone())
            .send()
            .await
            .map_err(request_err)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(HttpError::Status {
                url: self.url.clone(),
                status,
            });
        }
        response.bytes().await.map_err(request_err)?;
        Ok(())
    }

    /// Polls until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(url = %self.url, delay = ?self.delay, "starting HTTP presence polling");

        // The first tick completes immediately.
        let mut ticker = interval(self.delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown) => break,

                _ = ticker.tick() => {
                    let ping = self.ping_once();
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break,
                        result = ping => match result {
                            Ok(()) => debug!(url = %self.url, "ping accepted"),
                            Err(e) => warn!("{e}"),
                        },
                    }
                }
            }
        }

        info!(url = %self.url, "HTTP presence polling stopped");
    }
}

fn ping_url(base: &str) -> String {
    format!("{}{PING_PATH}", base.trim_end_matches('/'))
}
