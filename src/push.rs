use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::acquisition::SourceConfig;
use crate::models::{RawReading, Sample};

/// Outbound relay to the remote service. Pushes are fire-and-forget: a hung
/// or failing endpoint must never stall the ingestion path, so failures are
/// logged and dropped. Without a token (or endpoint) pushing is a no-op
/// while local delivery and storage proceed.
#[derive(Clone)]
pub struct Pusher {
    client: reqwest::Client,
    config_rx: watch::Receiver<SourceConfig>,
}

#[derive(Serialize)]
struct PushBody<'a> {
    token: &'a str,
    #[serde(flatten)]
    reading: RawReading,
}

#[derive(Deserialize)]
struct EmailPartialResponse {
    partial: String,
}

impl Pusher {
    pub fn new(config_rx: watch::Receiver<SourceConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config_rx,
        }
    }

    pub fn push(&self, sample: &Sample) {
        let config = self.config_rx.borrow().clone();
        if config.token.is_empty() {
            debug!("no token configured; skipping push");
            return;
        }
        if config.endpoint_url.is_empty() {
            return;
        }

        let url = format!(
            "{}/api/sensor/token",
            config.endpoint_url.trim_end_matches('/')
        );
        let body = match serde_json::to_value(PushBody {
            token: &config.token,
            reading: sample.raw(),
        }) {
            Ok(body) => body,
            Err(err) => {
                warn!("failed to encode push body: {err}");
                return;
            }
        };
        let client = self.client.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!("push rejected by {url}: {}", response.status());
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("push to {url} failed: {err}");
                }
            }
        });
    }

    /// Asks the remote service for the partial email behind the current
    /// token. `None` covers every failure mode; callers keep whatever they
    /// had cached.
    pub async fn fetch_email_partial(&self) -> Option<String> {
        let config = self.config_rx.borrow().clone();
        if config.token.is_empty() || config.endpoint_url.is_empty() {
            return None;
        }

        let url = format!(
            "{}/api/user/email",
            config.endpoint_url.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .query(&[("token", config.token.as_str())])
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => response
                .json::<EmailPartialResponse>()
                .await
                .map(|body| body.partial)
                .map_err(|err| warn!("email lookup returned malformed body: {err}"))
                .ok(),
            Ok(response) => {
                debug!("email lookup rejected: {}", response.status());
                None
            }
            Err(err) => {
                warn!("email lookup failed: {err}");
                None
            }
        }
    }
}
