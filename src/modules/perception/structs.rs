use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One scraped headline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsRecord {
    pub title: String,
    pub source: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

impl NewsRecord {
    pub fn new(
        title: impl Into<String>,
        source: impl Into<String>,
        url: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
            url: url.into(),
            timestamp,
        }
    }
}

/// Outcome of scraping one feed, kept so the store can track source health.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: String,
    pub items: Vec<NewsRecord>,
    pub error: Option<String>,
}

impl SourceBatch {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
