use anyhow::Result;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

use crate::config::agent_profile::NewsSettings;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Shared client for the feed scrapers. Per-request timeouts come from the
    /// news settings; this only bounds connection setup and idle sockets.
    pub fn create(settings: &NewsSettings) -> Result<Client> {
        let builder = Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_sec.max(1) * 2))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(30)));

        info!("🌐 [Http Client] feed timeout {}s", settings.http_timeout_sec);

        let client = builder.build()?;
        Ok(client)
    }
}
