//! Tag model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A free-form post tag, created on demand by name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    pub fn new(slug: String, name: String) -> Self {
        Self {
            id: 0,
            slug,
            name,
            created_at: Utc::now(),
        }
    }
}

/// Tag with usage count, for tag clouds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagWithCount {
    #[serde(flatten)]
    pub tag: Tag,
    pub post_count: i64,
}

impl TagWithCount {
    pub fn new(tag: Tag, post_count: i64) -> Self {
        Self { tag, post_count }
    }
}
