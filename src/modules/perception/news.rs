use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

use super::structs::{NewsRecord, SourceBatch};
use super::NewsFeed;
use crate::config::agent_profile::{FeedSource, NewsSettings};

/// Scrapes the configured RSS feeds.
pub struct NewsSentinel {
    client: Client,
    settings: NewsSettings,
}

impl NewsSentinel {
    pub fn new(client: Client, settings: NewsSettings) -> Self {
        Self { client, settings }
    }

    async fn fetch_source(&self, source: &FeedSource) -> SourceBatch {
        match self.fetch_feed(source).await {
            Ok(items) => {
                info!("📰 [{}] {} headlines", source.name, items.len());
                SourceBatch { source: source.name.clone(), items, error: None }
            }
            Err(e) => {
                warn!("⚠️ [{}] feed failed: {:#}", source.name, e);
                SourceBatch {
                    source: source.name.clone(),
                    items: Vec::new(),
                    error: Some(format!("{:#}", e)),
                }
            }
        }
    }

    async fn fetch_feed(&self, source: &FeedSource) -> Result<Vec<NewsRecord>> {
        let body = self
            .client
            .get(&source.url)
            .header(reqwest::header::USER_AGENT, &self.settings.user_agent)
            .timeout(Duration::from_secs(self.settings.http_timeout_sec))
            .send()
            .await
            .with_context(|| format!("GET {}", source.url))?
            .error_for_status()?
            .text()
            .await?;

        Ok(parse_rss(&body, &source.name, self.settings.items_per_source))
    }
}

#[async_trait]
impl NewsFeed for NewsSentinel {
    async fn fetch_news(&self) -> Vec<SourceBatch> {
        join_all(self.settings.sources.iter().map(|s| self.fetch_source(s))).await
    }
}

/// Pulls `title`/`link`/`pubDate` out of each `<item>`. Items without a title or
/// link are skipped; an unparseable date becomes "now".
pub fn parse_rss(xml: &str, source: &str, limit: usize) -> Vec<NewsRecord> {
    xml.split("<item>")
        .skip(1)
        .filter_map(|part| {
            let title = tag_text(part, "title")?;
            let url = tag_text(part, "link")?;
            let timestamp = tag_text(part, "pubDate")
                .and_then(|d| DateTime::parse_from_rfc2822(&d).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            Some(NewsRecord { title, source: source.to_string(), url, timestamp })
        })
        .take(limit)
        .collect()
}

fn tag_text(part: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = part.find(&open)? + open.len();
    let end = start + part[start..].find(&close)?;
    let text = decode_entities(
        part[start..end]
            .replace("<![CDATA[", "")
            .replace("]]>", "")
            .trim(),
    );
    (!text.is_empty()).then_some(text)
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
