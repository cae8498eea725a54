use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ingested news item plus its processing-status flags.
///
/// Rows are created by the external collector and mutated only by the
/// status tracker and the normalizer. The core never deletes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub title_local: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub category_id: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub processed: bool,
    pub in_progress: bool,
    /// Lifetime failure counter. Preserved across successful runs for audit.
    pub failure_count: i64,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub title_local: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub category_id: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
}
