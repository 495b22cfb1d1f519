use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::pipeline::SentimentPipeline;
use super::record::{Provenance, SentimentRecord};
use crate::config::agent_profile::AgentProfile;
use crate::database::AnalysisStore;
use crate::modules::perception::{NewsFeed, NewsRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    DatabaseCache,
    FreshScraping,
    None,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseCache => "database_cache",
            Self::FreshScraping => "fresh_scraping",
            Self::None => "none",
        }
    }
}

/// What one run of the agent hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    #[serde(flatten)]
    pub record: SentimentRecord,
    pub analysis_method: &'static str,
    pub provenance: Provenance,
    pub data_source: DataSource,
    pub news_count: usize,
    pub analyzed_at: DateTime<Utc>,
    pub analysis_id: Option<Uuid>,
}

/// Cache-or-scrape, analyze, persist.
pub struct SentimentAgent {
    feed: Arc<dyn NewsFeed>,
    store: Arc<dyn AnalysisStore>,
    pipeline: SentimentPipeline,
    profile: AgentProfile,
}

impl SentimentAgent {
    pub fn new(feed: Arc<dyn NewsFeed>, store: Arc<dyn AnalysisStore>, profile: AgentProfile) -> Self {
        Self {
            feed,
            store,
            pipeline: SentimentPipeline::new(profile.tool.clone()),
            profile,
        }
    }

    /// Store failures are logged and skipped; the verdict is always produced.
    pub async fn run(&self, force_refresh: bool) -> AnalysisReport {
        let (news, data_source) = self.gather_news(force_refresh).await;
        let data_source = if news.is_empty() { DataSource::None } else { data_source };

        let outcome = self.pipeline.analyze(&news).await;
        let mut report = AnalysisReport {
            analysis_method: outcome.provenance.method_name(),
            record: outcome.record,
            provenance: outcome.provenance,
            data_source,
            news_count: news.len(),
            analyzed_at: Utc::now(),
            analysis_id: None,
        };

        if report.record.is_available() {
            match self.store.save_analysis(&report).await {
                Ok(id) => report.analysis_id = id,
                Err(e) => warn!("⚠️ Failed to save analysis, continuing: {:#}", e),
            }
        }
        report
    }

    async fn gather_news(&self, force_refresh: bool) -> (Vec<NewsRecord>, DataSource) {
        let cache = &self.profile.cache;
        if !force_refresh {
            match self.store.is_cache_fresh(cache.freshness_hours).await {
                Ok(true) => match self.store.recent_news(cache.lookback_hours).await {
                    Ok(items) if !items.is_empty() => {
                        info!("🗄️ Using {} cached headlines", items.len());
                        return (items, DataSource::DatabaseCache);
                    }
                    Ok(_) => info!("Cache is fresh but holds nothing in the lookback window"),
                    Err(e) => warn!("⚠️ Cache read failed: {:#}", e),
                },
                Ok(false) => info!("Cache is stale, scraping"),
                Err(e) => warn!("⚠️ Cache check failed: {:#}", e),
            }
        }

        let mut news = Vec::new();
        for batch in self.feed.fetch_news().await {
            if let Err(e) = self
                .store
                .update_source_status(&batch.source, batch.is_success(), batch.error.as_deref())
                .await
            {
                warn!("⚠️ Source status for {} not recorded: {:#}", batch.source, e);
            }
            news.extend(batch.items);
        }

        if !news.is_empty() {
            match self.store.save_news_items(&news).await {
                Ok(saved) => info!("💾 Saved {} new headlines", saved),
                Err(e) => warn!("⚠️ Failed to save headlines: {:#}", e),
            }
        }
        (news, DataSource::FreshScraping)
    }

    /// Drops stored headlines older than the retention window.
    pub async fn cleanup(&self) -> anyhow::Result<u64> {
        self.store.cleanup_old_data(self.profile.cache.retention_days).await
    }
}
