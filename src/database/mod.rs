pub mod news_store;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::modules::brain::agent::AnalysisReport;
use crate::modules::perception::NewsRecord;

pub use news_store::PgNewsStore;

const SCHEMA: &str = include_str!("schema.sql");

/// Headline cache plus verdict history.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// True when anything was scraped within the last `max_age_hours`.
    async fn is_cache_fresh(&self, max_age_hours: i64) -> Result<bool>;

    /// Processed headlines published inside the lookback window, newest first.
    async fn recent_news(&self, lookback_hours: i64) -> Result<Vec<NewsRecord>>;

    /// Inserts unseen URLs and refreshes `scraped_at` on known ones. Returns the
    /// number of new rows.
    async fn save_news_items(&self, items: &[NewsRecord]) -> Result<usize>;

    async fn save_analysis(&self, report: &AnalysisReport) -> Result<Option<Uuid>>;

    async fn update_source_status(&self, source: &str, success: bool, error: Option<&str>) -> Result<()>;

    async fn cleanup_old_data(&self, days_to_keep: i64) -> Result<u64>;
}

/// Used when no database is configured: nothing is cached and nothing persists.
#[derive(Debug, Default)]
pub struct OfflineStore;

#[async_trait]
impl AnalysisStore for OfflineStore {
    async fn is_cache_fresh(&self, _max_age_hours: i64) -> Result<bool> {
        Ok(false)
    }

    async fn recent_news(&self, _lookback_hours: i64) -> Result<Vec<NewsRecord>> {
        Ok(Vec::new())
    }

    async fn save_news_items(&self, _items: &[NewsRecord]) -> Result<usize> {
        Ok(0)
    }

    async fn save_analysis(&self, _report: &AnalysisReport) -> Result<Option<Uuid>> {
        info!("🔌 Database disabled, analysis not persisted");
        Ok(None)
    }

    async fn update_source_status(&self, _source: &str, _success: bool, _error: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn cleanup_old_data(&self, _days_to_keep: i64) -> Result<u64> {
        Ok(0)
    }
}

pub async fn init_database(pool: &PgPool) -> Result<()> {
    info!("Checking database schema...");
    for stmt in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        if let Err(e) = sqlx::query(stmt).execute(pool).await {
            if !e.to_string().contains("already exists") {
                warn!("Schema warning: {}", e);
            }
        }
    }
    info!("Database schema check complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_splits_into_create_statements() {
        let statements: Vec<&str> = SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
        assert_eq!(statements.len(), 6);
        assert!(statements.iter().all(|s| s.starts_with("CREATE")));
    }

    #[tokio::test]
    async fn offline_store_is_never_fresh() {
        let store = OfflineStore;
        assert!(!store.is_cache_fresh(2).await.unwrap());
        assert!(store.recent_news(24).await.unwrap().is_empty());
        assert_eq!(store.cleanup_old_data(30).await.unwrap(), 0);
    }
}
