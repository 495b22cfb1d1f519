use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Timelike, Utc, Weekday};
use serde_json::json;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::{init_database, AnalysisStore};
use crate::modules::brain::agent::AnalysisReport;
use crate::modules::perception::NewsRecord;

const MARKET_KEYWORDS: [&str; 13] = [
    "fed", "rate", "inflation", "cpi", "market", "stock", "trade", "bull", "bear", "rally",
    "crash", "volatile", "economy",
];
const ANALYSIS_ROW_LIMIT: i64 = 100;

pub struct PgNewsStore {
    pool: PgPool,
}

impl PgNewsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and makes sure the tables exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("failed to connect to PostgreSQL")?;
        init_database(&pool).await?;
        info!("🗄️ Connected to PostgreSQL");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl AnalysisStore for PgNewsStore {
    async fn is_cache_fresh(&self, max_age_hours: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM news_items WHERE scraped_at >= NOW() - make_interval(hours => $1::int)",
        )
        .bind(max_age_hours)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn recent_news(&self, lookback_hours: i64) -> Result<Vec<NewsRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT title, url, source, published_at
            FROM news_items
            WHERE published_at >= NOW() - make_interval(hours => $1::int)
              AND processing_status = 'processed'
            ORDER BY published_at DESC
            LIMIT $2
            "#,
        )
        .bind(lookback_hours)
        .bind(ANALYSIS_ROW_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let mut news = Vec::with_capacity(rows.len());
        for row in rows {
            news.push(NewsRecord {
                title: row.try_get("title")?,
                url: row.try_get("url")?,
                source: row.try_get("source")?,
                timestamp: row.try_get("published_at")?,
            });
        }
        Ok(news)
    }

    async fn save_news_items(&self, items: &[NewsRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for item in items {
            let result = sqlx::query(
                r#"
                INSERT INTO news_items (id, title, url, source, published_at, scraped_at,
                                        processing_status, keywords, market_hours)
                VALUES ($1, $2, $3, $4, $5, NOW(), 'processed', $6, $7)
                ON CONFLICT (url) DO UPDATE
                    SET scraped_at = NOW(), processing_status = 'processed'
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&item.title)
            .bind(&item.url)
            .bind(&item.source)
            .bind(item.timestamp)
            .bind(json!(extract_keywords(&item.title)))
            .bind(market_hours(item.timestamp))
            .fetch_one(&mut *tx)
            .await;

            match result {
                Ok(row) => {
                    if row.try_get::<bool, _>("inserted")? {
                        inserted += 1;
                    }
                }
                Err(e) => {
                    warn!("⚠️ Could not save headline '{}': {}", item.title, e);
                    // a failed statement aborts the transaction
                    return Err(e).context("saving headlines");
                }
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn save_analysis(&self, report: &AnalysisReport) -> Result<Option<Uuid>> {
        let id = Uuid::new_v4();
        let record = &report.record;
        sqlx::query(
            r#"
            INSERT INTO sentiment_analyses (id, overall_sentiment, score, risk_level, catalysts,
                                            summary, news_count, analysis_method, data_source,
                                            provenance, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(id)
        .bind(record.sentiment.as_str())
        .bind(record.score)
        .bind(record.risk_level.as_str())
        .bind(json!(record.catalysts))
        .bind(&record.summary)
        .bind(i32::try_from(report.news_count).unwrap_or(i32::MAX))
        .bind(report.analysis_method)
        .bind(report.data_source.as_str())
        .bind(serde_json::to_value(&report.provenance)?)
        .bind(report.analyzed_at)
        .execute(&self.pool)
        .await
        .context("inserting sentiment analysis")?;

        info!("💾 Analysis saved with id {}", id);
        Ok(Some(id))
    }

    async fn update_source_status(&self, source: &str, success: bool, error: Option<&str>) -> Result<()> {
        let query = if success {
            sqlx::query(
                r#"
                INSERT INTO news_sources (name, last_scraped_at, last_success_at, success_count)
                VALUES ($1, NOW(), NOW(), 1)
                ON CONFLICT (name) DO UPDATE
                    SET last_scraped_at = NOW(),
                        last_success_at = NOW(),
                        success_count = news_sources.success_count + 1
                "#,
            )
            .bind(source)
        } else {
            sqlx::query(
                r#"
                INSERT INTO news_sources (name, last_scraped_at, error_count, last_error)
                VALUES ($1, NOW(), 1, $2)
                ON CONFLICT (name) DO UPDATE
                    SET last_scraped_at = NOW(),
                        error_count = news_sources.error_count + 1,
                        last_error = EXCLUDED.last_error
                "#,
            )
            .bind(source)
            .bind(error)
        };
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn cleanup_old_data(&self, days_to_keep: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM news_items WHERE published_at < NOW() - make_interval(days => $1::int)",
        )
        .bind(days_to_keep)
        .execute(&self.pool)
        .await?;
        info!("🧹 Cleaned up {} old headlines", result.rows_affected());
        Ok(result.rows_affected())
    }
}

/// Market vocabulary found in a title, in vocabulary order.
pub fn extract_keywords(title: &str) -> Vec<&'static str> {
    let lower = title.to_lowercase();
    MARKET_KEYWORDS
        .iter()
        .copied()
        .filter(|k| lower.contains(k))
        .collect()
}

/// US equity session of a timestamp, judged in New York local time.
pub fn market_hours(ts: DateTime<Utc>) -> &'static str {
    let local = ts + ChronoDuration::hours(new_york_offset_hours(ts));
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return "extended";
    }
    match local.hour() {
        4..=8 => "pre-market",
        9..=15 => "market",
        16..=19 => "after-hours",
        _ => "extended",
    }
}

// EDT runs from 02:00 local on the second Sunday of March to 02:00 local on
// the first Sunday of November.
fn new_york_offset_hours(ts: DateTime<Utc>) -> i64 {
    let year = ts.year();
    let bounds = nth_sunday(year, 3, 2)
        .and_then(|d| d.and_hms_opt(7, 0, 0))
        .zip(nth_sunday(year, 11, 1).and_then(|d| d.and_hms_opt(6, 0, 0)));
    match bounds {
        Some((start, end)) if ts.naive_utc() >= start && ts.naive_utc() < end => -4,
        _ => -5,
    }
}

fn nth_sunday(year: i32, month: u32, n: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let to_sunday = (7 - first.weekday().num_days_from_sunday()) % 7;
    first.checked_add_signed(ChronoDuration::days(i64::from(to_sunday + 7 * (n - 1))))
}
