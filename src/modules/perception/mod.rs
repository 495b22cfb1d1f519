pub mod structs;
pub mod text_serializer;
pub mod news;

use async_trait::async_trait;

pub use structs::{NewsRecord, SourceBatch};
pub use news::NewsSentinel;
pub use text_serializer::serialize_to_table;

/// Anything that can hand the agent a fresh set of headlines, one batch per source.
#[async_trait]
pub trait NewsFeed: Send + Sync {
    async fn fetch_news(&self) -> Vec<SourceBatch>;
}
