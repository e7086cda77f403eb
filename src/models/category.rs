//! Category model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A blog category ("Tax Planning", "Bookkeeping", ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: i64,
    /// URL-friendly slug (unique)
    pub slug: String,
    /// Display name (unique)
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Category {
    /// The ID is assigned by the database
    pub fn new(slug: String, name: String, description: Option<String>) -> Self {
        Self {
            id: 0,
            slug,
            name,
            description,
            created_at: Utc::now(),
        }
    }
}

/// Category with the number of posts filed under it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryWithCount {
    #[serde(flatten)]
    pub category: Category,
    pub post_count: i64,
}

/// Input for creating a category
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCategoryInput {
    pub name: String,
    /// Generated from the name when absent
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Input for updating a category
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCategoryInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_with_count_flattens() {
        let item = CategoryWithCount {
            category: Category::new("tax".into(), "Tax".into(), None),
            post_count: 3,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["slug"], "tax");
        assert_eq!(json["post_count"], 3);
    }
}
