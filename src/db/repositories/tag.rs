//! Tag repository
//!
//! - `TagRepository` trait defining the interface for tag data access
//! - `SqlxTagRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Tag, TagWithCount};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Tag repository trait
#[async_trait]
pub trait TagRepository: Send + Sync {
    async fn create(&self, tag: &Tag) -> Result<Tag>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Tag>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tag>>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Tag>>;

    /// Tags with usage counts, most used first
    async fn list_with_counts(&self) -> Result<Vec<TagWithCount>>;

    /// Delete a tag; its post associations cascade
    async fn delete(&self, id: i64) -> Result<()>;
}

/// SQLx-based tag repository implementation
pub struct SqlxTagRepository {
    pool: DynDatabasePool,
}

impl SqlxTagRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TagRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl TagRepository for SqlxTagRepository {
    async fn create(&self, tag: &Tag) -> Result<Tag> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_tag_sqlite(self.pool.sqlite()?, tag).await,
            DatabaseDriver::Mysql => create_tag_mysql(self.pool.mysql()?, tag).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Tag>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_tag_by_id_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_tag_by_id_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tag>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_tag_where_sqlite(self.pool.sqlite()?, "slug", slug).await,
            DatabaseDriver::Mysql => get_tag_where_mysql(self.pool.mysql()?, "slug", slug).await,
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Tag>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_tag_where_sqlite(self.pool.sqlite()?, "name", name).await,
            DatabaseDriver::Mysql => get_tag_where_mysql(self.pool.mysql()?, "name", name).await,
        }
    }

    async fn list_with_counts(&self) -> Result<Vec<TagWithCount>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_tags_sqlite(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => list_tags_mysql(self.pool.mysql()?).await,
        }
    }

    async fn delete(&self, id: i64) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query("DELETE FROM tags WHERE id = ?")
                    .bind(id)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to delete tag")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query("DELETE FROM tags WHERE id = ?")
                    .bind(id)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to delete tag")?;
            }
        }
        Ok(())
    }
}

const LIST_WITH_COUNTS: &str = r#"
    SELECT t.id, t.slug, t.name, t.created_at, COUNT(pt.post_id) AS post_count
    FROM tags t
    LEFT JOIN post_tags pt ON pt.tag_id = t.id
    GROUP BY t.id, t.slug, t.name, t.created_at
    ORDER BY post_count DESC, t.name ASC
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_tag_sqlite(pool: &SqlitePool, tag: &Tag) -> Result<Tag> {
    let now = Utc::now();
    let result = sqlx::query("INSERT INTO tags (slug, name, created_at) VALUES (?, ?, ?)")
        .bind(&tag.slug)
        .bind(&tag.name)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create tag")?;

    Ok(Tag {
        id: result.last_insert_rowid(),
        created_at: now,
        ..tag.clone()
    })
}

async fn get_tag_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Tag>> {
    let row = sqlx::query("SELECT id, slug, name, created_at FROM tags WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get tag by ID")?;

    Ok(row.map(|r| row_to_tag_sqlite(&r)))
}

async fn get_tag_where_sqlite(pool: &SqlitePool, column: &str, value: &str) -> Result<Option<Tag>> {
    let sql = format!("SELECT id, slug, name, created_at FROM tags WHERE {} = ?", column);
    let row = sqlx::query(&sql)
        .bind(value)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get tag by {}", column))?;

    Ok(row.map(|r| row_to_tag_sqlite(&r)))
}

async fn list_tags_sqlite(pool: &SqlitePool) -> Result<Vec<TagWithCount>> {
    let rows = sqlx::query(LIST_WITH_COUNTS)
        .fetch_all(pool)
        .await
        .context("Failed to list tags")?;

    Ok(rows
        .iter()
        .map(|r| TagWithCount::new(row_to_tag_sqlite(r), r.get("post_count")))
        .collect())
}

fn row_to_tag_sqlite(row: &sqlx::sqlite::SqliteRow) -> Tag {
    Tag {
        id: row.get("id"),
        slug: row.get("slug"),
        name: row.get("name"),
        created_at: row.get("created_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_tag_mysql(pool: &MySqlPool, tag: &Tag) -> Result<Tag> {
    let now = Utc::now();
    let result = sqlx::query("INSERT INTO tags (slug, name, created_at) VALUES (?, ?, ?)")
        .bind(&tag.slug)
        .bind(&tag.name)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create tag")?;

    Ok(Tag {
        id: result.last_insert_id() as i64,
        created_at: now,
        ..tag.clone()
    })
}

async fn get_tag_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Tag>> {
    let row = sqlx::query("SELECT id, slug, name, created_at FROM tags WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get tag by ID")?;

    Ok(row.map(|r| row_to_tag_mysql(&r)))
}

async fn get_tag_where_mysql(pool: &MySqlPool, column: &str, value: &str) -> Result<Option<Tag>> {
    let sql = format!("SELECT id, slug, name, created_at FROM tags WHERE {} = ?", column);
    let row = sqlx::query(&sql)
        .bind(value)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get tag by {}", column))?;

    Ok(row.map(|r| row_to_tag_mysql(&r)))
}

async fn list_tags_mysql(pool: &MySqlPool) -> Result<Vec<TagWithCount>> {
    let rows = sqlx::query(LIST_WITH_COUNTS)
        .fetch_all(pool)
        .await
        .context("Failed to list tags")?;

    Ok(rows
        .iter()
        .map(|r| TagWithCount::new(row_to_tag_mysql(r), r.get("post_count")))
        .collect())
}

fn row_to_tag_mysql(row: &sqlx::mysql::MySqlRow) -> Tag {
    Tag {
        id: row.get("id"),
        slug: row.get("slug"),
        name: row.get("name"),
        created_at: row.get("created_at"),
    }
}
