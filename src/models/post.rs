//! Post model
//!
//! - `Post` entity (a blog article) with its categories and tags
//! - `PostStatus` lifecycle values
//! - Input and filter types used by the admin and public APIs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Category, Tag};

/// Blog post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    /// URL-friendly slug (unique)
    pub slug: String,
    pub title: String,
    pub excerpt: Option<String>,
    /// Markdown source
    pub content: String,
    /// Rendered HTML
    pub content_html: String,
    pub featured_image: Option<String>,
    pub author_id: i64,
    pub status: PostStatus,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    pub reading_time_minutes: i32,
    pub published_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Post {
    pub fn is_published(&self) -> bool {
        self.status == PostStatus::Published
    }

    pub fn category_ids(&self) -> Vec<i64> {
        self.categories.iter().map(|c| c.id).collect()
    }
}

/// Post lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    /// Not visible to the public
    #[default]
    Draft,
    /// Visible to the public
    Published,
    /// Published automatically once `scheduled_at` passes
    Scheduled,
    /// Hidden but kept
    Archived,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(PostStatus::Draft),
            "published" => Ok(PostStatus::Published),
            "scheduled" => Ok(PostStatus::Scheduled),
            "archived" => Ok(PostStatus::Archived),
            _ => Err(anyhow::anyhow!("Invalid post status: {}", s)),
        }
    }
}

/// Input for creating a post
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePostInput {
    pub title: String,
    /// Generated from the title when absent
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub content: String,
    /// Derived from content when absent
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub featured_image: Option<String>,
    /// Defaults to draft
    #[serde(default)]
    pub status: Option<PostStatus>,
    #[serde(default)]
    pub seo_title: Option<String>,
    #[serde(default)]
    pub seo_description: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category_ids: Vec<i64>,
    /// Tag names; missing tags are created
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Input for updating a post. `None` leaves a field untouched; association
/// lists, when present, replace the existing ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePostInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub featured_image: Option<String>,
    #[serde(default)]
    pub status: Option<PostStatus>,
    #[serde(default)]
    pub seo_title: Option<String>,
    #[serde(default)]
    pub seo_description: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Filters for post list queries
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub status: Option<PostStatus>,
    pub category_id: Option<i64>,
    pub category_slug: Option<String>,
    pub tag_slug: Option<String>,
    /// Substring match on title and content
    pub search: Option<String>,
    pub author_id: Option<i64>,
}

impl PostFilter {
    /// Public listings only ever see published posts
    pub fn published() -> Self {
        Self {
            status: Some(PostStatus::Published),
            ..Self::default()
        }
    }
}

/// Post counts per status, for the dashboard
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostStatusCounts {
    pub draft: i64,
    pub published: i64,
    pub scheduled: i64,
    pub archived: i64,
}

impl PostStatusCounts {
    pub fn total(&self) -> i64 {
        self.draft + self.published + self.scheduled + self.archived
    }
}
