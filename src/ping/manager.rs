// SPDX-License-Identifier: GPL-3.0-only
use reqwest::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Configurator;
use crate::crx::ItemDetails;
use crate::downloader::HttpClient;
use crate::ping::message::build_ping;

/// Fire-and-forget delivery of update-complete pings.
#[derive(Clone)]
pub struct PingManager {
    client: Client,
    config: Arc<dyn Configurator>,
}

impl PingManager {
    pub fn new(config: Arc<dyn Configurator>) -> anyhow::Result<Self> {
        Ok(Self {
            client: HttpClient::new()?.client().clone(),
            config,
        })
    }

    /// Queue a ping for a finished item. The returned handle only matters to
    /// tests; callers normally drop it.
    pub fn on_update_complete(&self, item: &ItemDetails) -> Option<JoinHandle<()>> {
        let urls = self.config.ping_urls();
        if urls.is_empty() {
            debug!(id = %item.id, "Pings disabled");
            return None;
        }

        let body = match serde_json::to_string(&build_ping(self.config.as_ref(), item)) {
            Ok(body) => body,
            Err(e) => {
                warn!(id = %item.id, error = %e, "Failed to serialize ping");
                return None;
            }
        };

        let client = self.client.clone();
        let id = item.id.clone();
        Some(tokio::spawn(async move {
            send_ping(&client, &urls, body, &id).await;
        }))
    }
}

/// Try each endpoint in order until one accepts the ping.
async fn send_ping(client: &Client, urls: &[Url], body: String, id: &str) {
    for url in urls {
        let result = client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.clone())
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!(id = %id, url = %url, "Ping sent");
                return;
            }
            Ok(response) => {
                warn!(id = %id, url = %url, status = %response.status(), "Ping rejected");
            }
            Err(e) => {
                warn!(id = %id, url = %url, error = %e, "Ping failed");
            }
        }
    }

    warn!(id = %id, "No ping endpoint accepted the ping");
}
