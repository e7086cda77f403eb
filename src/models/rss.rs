//! RSS feed and item models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An external syndication source (IRS newsroom, state tax board, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssFeed {
    pub id: i64,
    pub name: String,
    /// http(s) URL, unique
    pub url: String,
    /// Category given to posts imported from this feed
    pub category_id: Option<i64>,
    pub is_active: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Error from the most recent refresh, cleared on success
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFeedInput {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateFeedInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// A fetched entry of a feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssItem {
    pub id: i64,
    pub feed_id: i64,
    /// Unique per feed
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Whether a draft post was created from this item
    pub imported: bool,
    pub post_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// An entry as parsed out of a feed document, before storage
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Result of refreshing one feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRefreshReport {
    pub feed_id: i64,
    pub feed_name: String,
    pub new_items: usize,
    pub error: Option<String>,
}

impl FeedRefreshReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Item list filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemFilter {
    #[serde(default)]
    pub feed_id: Option<i64>,
    #[serde(default)]
    pub imported: Option<bool>,
}
