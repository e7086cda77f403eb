//! RSS feed and item repository
//!
//! Items are unique per `(feed_id, guid)`; inserting a known item is a no-op,
//! which is what makes repeated refreshes idempotent.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{ItemFilter, ParsedItem, RssFeed, RssItem};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait RssRepository: Send + Sync {
    async fn create_feed(&self, feed: &RssFeed) -> Result<RssFeed>;

    async fn get_feed(&self, id: i64) -> Result<Option<RssFeed>>;

    async fn get_feed_by_url(&self, url: &str) -> Result<Option<RssFeed>>;

    async fn list_feeds(&self) -> Result<Vec<RssFeed>>;

    async fn list_active_feeds(&self) -> Result<Vec<RssFeed>>;

    /// Persist name, url, category and active flag
    async fn update_feed(&self, feed: &RssFeed) -> Result<()>;

    /// Delete a feed; its items cascade
    async fn delete_feed(&self, id: i64) -> Result<bool>;

    /// Stamp a fetch attempt; `error` of `None` clears the previous error
    async fn record_fetch(&self, id: i64, at: DateTime<Utc>, error: Option<&str>) -> Result<()>;

    /// Insert an item unless `(feed_id, guid)` exists; true when inserted
    async fn insert_item(&self, feed_id: i64, item: &ParsedItem) -> Result<bool>;

    async fn get_item(&self, id: i64) -> Result<Option<RssItem>>;

    /// Newest first
    async fn list_items(&self, filter: &ItemFilter, offset: i64, limit: i64)
        -> Result<Vec<RssItem>>;

    async fn count_items(&self, filter: &ItemFilter) -> Result<i64>;

    /// Flag an item as imported into `post_id`. False when it already was.
    async fn mark_imported(&self, id: i64, post_id: i64) -> Result<bool>;
}

pub struct SqlxRssRepository {
    pool: DynDatabasePool,
}

impl SqlxRssRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn RssRepository> {
        Arc::new(Self::new(pool))
    }
}

const FEED_COLUMNS: &str =
    "id, name, url, category_id, is_active, last_fetched_at, last_error, created_at";

const ITEM_COLUMNS: &str = "id, feed_id, guid, title, link, description, author, published_at, \
    imported, post_id, created_at";

/// WHERE clause for an item filter. Binds follow in order: feed_id, imported.
fn item_where(filter: &ItemFilter) -> String {
    let mut conditions = vec!["1 = 1"];
    if filter.feed_id.is_some() {
        conditions.push("feed_id = ?");
    }
    if filter.imported.is_some() {
        conditions.push("imported = ?");
    }
    conditions.join(" AND ")
}

#[async_trait]
impl RssRepository for SqlxRssRepository {
    async fn create_feed(&self, feed: &RssFeed) -> Result<RssFeed> {
        let now = Utc::now();
        let sql = "INSERT INTO rss_feeds (name, url, category_id, is_active, created_at) VALUES (?, ?, ?, ?, ?)";
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&feed.name)
                .bind(&feed.url)
                .bind(feed.category_id)
                .bind(feed.is_active)
                .bind(now)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to create feed")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&feed.name)
                .bind(&feed.url)
                .bind(feed.category_id)
                .bind(feed.is_active)
                .bind(now)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to create feed")?
                .last_insert_id() as i64,
        };

        Ok(RssFeed {
            id,
            created_at: now,
            last_fetched_at: None,
            last_error: None,
            ..feed.clone()
        })
    }

    async fn get_feed(&self, id: i64) -> Result<Option<RssFeed>> {
        let sql = format!("SELECT {} FROM rss_feeds WHERE id = ?", FEED_COLUMNS);
        Ok(match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get feed")?
                .map(|r| row_to_feed_sqlite(&r)),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get feed")?
                .map(|r| row_to_feed_mysql(&r)),
        })
    }

    async fn get_feed_by_url(&self, url: &str) -> Result<Option<RssFeed>> {
        let sql = format!("SELECT {} FROM rss_feeds WHERE url = ?", FEED_COLUMNS);
        Ok(match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(url)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get feed by URL")?
                .map(|r| row_to_feed_sqlite(&r)),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(url)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get feed by URL")?
                .map(|r| row_to_feed_mysql(&r)),
        })
    }

    async fn list_feeds(&self) -> Result<Vec<RssFeed>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_feeds_sqlite(self.pool.sqlite()?, false).await,
            DatabaseDriver::Mysql => list_feeds_mysql(self.pool.mysql()?, false).await,
        }
    }

    async fn list_active_feeds(&self) -> Result<Vec<RssFeed>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_feeds_sqlite(self.pool.sqlite()?, true).await,
            DatabaseDriver::Mysql => list_feeds_mysql(self.pool.mysql()?, true).await,
        }
    }

    async fn update_feed(&self, feed: &RssFeed) -> Result<()> {
        let sql = "UPDATE rss_feeds SET name = ?, url = ?, category_id = ?, is_active = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(&feed.name)
                    .bind(&feed.url)
                    .bind(feed.category_id)
                    .bind(feed.is_active)
                    .bind(feed.id)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to update feed")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(&feed.name)
                    .bind(&feed.url)
                    .bind(feed.category_id)
                    .bind(feed.is_active)
                    .bind(feed.id)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to update feed")?;
            }
        }
        Ok(())
    }

    async fn delete_feed(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM rss_feeds WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to delete feed")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to delete feed")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn record_fetch(&self, id: i64, at: DateTime<Utc>, error: Option<&str>) -> Result<()> {
        let sql = "UPDATE rss_feeds SET last_fetched_at = ?, last_error = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(at)
                    .bind(error)
                    .bind(id)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to record feed fetch")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(at)
                    .bind(error)
                    .bind(id)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to record feed fetch")?;
            }
        }
        Ok(())
    }

    async fn insert_item(&self, feed_id: i64, item: &ParsedItem) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => insert_item_sqlite(self.pool.sqlite()?, feed_id, item).await,
            DatabaseDriver::Mysql => insert_item_mysql(self.pool.mysql()?, feed_id, item).await,
        }
    }

    async fn get_item(&self, id: i64) -> Result<Option<RssItem>> {
        let sql = format!("SELECT {} FROM rss_items WHERE id = ?", ITEM_COLUMNS);
        Ok(match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get RSS item")?
                .map(|r| row_to_item_sqlite(&r)),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get RSS item")?
                .map(|r| row_to_item_mysql(&r)),
        })
    }

    async fn list_items(
        &self,
        filter: &ItemFilter,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<RssItem>> {
        let sql = format!(
            "SELECT {} FROM rss_items WHERE {} \
             ORDER BY COALESCE(published_at, created_at) DESC, id DESC LIMIT ? OFFSET ?",
            ITEM_COLUMNS,
            item_where(filter)
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = sqlx::query(&sql);
                if let Some(feed_id) = filter.feed_id {
                    query = query.bind(feed_id);
                }
                if let Some(imported) = filter.imported {
                    query = query.bind(imported);
                }
                let rows = query
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to list RSS items")?;
                Ok(rows.iter().map(row_to_item_sqlite).collect())
            }
            DatabaseDriver::Mysql => {
                let mut query = sqlx::query(&sql);
                if let Some(feed_id) = filter.feed_id {
                    query = query.bind(feed_id);
                }
                if let Some(imported) = filter.imported {
                    query = query.bind(imported);
                }
                let rows = query
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to list RSS items")?;
                Ok(rows.iter().map(row_to_item_mysql).collect())
            }
        }
    }

    async fn count_items(&self, filter: &ItemFilter) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS count FROM rss_items WHERE {}",
            item_where(filter)
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = sqlx::query(&sql);
                if let Some(feed_id) = filter.feed_id {
                    query = query.bind(feed_id);
                }
                if let Some(imported) = filter.imported {
                    query = query.bind(imported);
                }
                let row = query
                    .fetch_one(self.pool.sqlite()?)
                    .await
                    .context("Failed to count RSS items")?;
                Ok(row.get("count"))
            }
            DatabaseDriver::Mysql => {
                let mut query = sqlx::query(&sql);
                if let Some(feed_id) = filter.feed_id {
                    query = query.bind(feed_id);
                }
                if let Some(imported) = filter.imported {
                    query = query.bind(imported);
                }
                let row = query
                    .fetch_one(self.pool.mysql()?)
                    .await
                    .context("Failed to count RSS items")?;
                Ok(row.get("count"))
            }
        }
    }

    async fn mark_imported(&self, id: i64, post_id: i64) -> Result<bool> {
        let sql = "UPDATE rss_items SET imported = ?, post_id = ? WHERE id = ? AND imported = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(true)
                .bind(post_id)
                .bind(id)
                .bind(false)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to mark RSS item imported")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(true)
                .bind(post_id)
                .bind(id)
                .bind(false)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to mark RSS item imported")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn list_feeds_sqlite(pool: &SqlitePool, active_only: bool) -> Result<Vec<RssFeed>> {
    let sql = if active_only {
        format!("SELECT {} FROM rss_feeds WHERE is_active = 1 ORDER BY name", FEED_COLUMNS)
    } else {
        format!("SELECT {} FROM rss_feeds ORDER BY name", FEED_COLUMNS)
    };
    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .context("Failed to list feeds")?;
    Ok(rows.iter().map(row_to_feed_sqlite).collect())
}

async fn insert_item_sqlite(pool: &SqlitePool, feed_id: i64, item: &ParsedItem) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO rss_items
            (feed_id, guid, title, link, description, author, published_at, imported, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(feed_id)
    .bind(&item.guid)
    .bind(&item.title)
    .bind(&item.link)
    .bind(&item.description)
    .bind(&item.author)
    .bind(item.published_at)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("Failed to insert RSS item")?;

    Ok(result.rows_affected() > 0)
}

fn row_to_feed_sqlite(row: &sqlx::sqlite::SqliteRow) -> RssFeed {
    RssFeed {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        category_id: row.get("category_id"),
        is_active: row.get("is_active"),
        last_fetched_at: row.get("last_fetched_at"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
    }
}

fn row_to_item_sqlite(row: &sqlx::sqlite::SqliteRow) -> RssItem {
    RssItem {
        id: row.get("id"),
        feed_id: row.get("feed_id"),
        guid: row.get("guid"),
        title: row.get("title"),
        link: row.get("link"),
        description: row.get("description"),
        author: row.get("author"),
        published_at: row.get("published_at"),
        imported: row.get("imported"),
        post_id: row.get("post_id"),
        created_at: row.get("created_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn list_feeds_mysql(pool: &MySqlPool, active_only: bool) -> Result<Vec<RssFeed>> {
    let sql = if active_only {
        format!("SELECT {} FROM rss_feeds WHERE is_active = TRUE ORDER BY name", FEED_COLUMNS)
    } else {
        format!("SELECT {} FROM rss_feeds ORDER BY name", FEED_COLUMNS)
    };
    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .context("Failed to list feeds")?;
    Ok(rows.iter().map(row_to_feed_mysql).collect())
}

async fn insert_item_mysql(pool: &MySqlPool, feed_id: i64, item: &ParsedItem) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT IGNORE INTO rss_items
            (feed_id, guid, title, link, description, author, published_at, imported, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, FALSE, ?)
        "#,
    )
    .bind(feed_id)
    .bind(&item.guid)
    .bind(&item.title)
    .bind(&item.link)
    .bind(&item.description)
    .bind(&item.author)
    .bind(item.published_at)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("Failed to insert RSS item")?;

    Ok(result.rows_affected() > 0)
}

fn row_to_feed_mysql(row: &sqlx::mysql::MySqlRow) -> RssFeed {
    RssFeed {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        category_id: row.get("category_id"),
        is_active: row.get("is_active"),
        last_fetched_at: row.get("last_fetched_at"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
    }
}

fn row_to_item_mysql(row: &sqlx::mysql::MySqlRow) -> RssItem {
    RssItem {
        id: row.get("id"),
        feed_id: row.get("feed_id"),
        guid: row.get("guid"),
        title: row.get("title"),
        link: row.get("link"),
        description: row.get("description"),
        author: row.get("author"),
        published_at: row.get("published_at"),
        imported: row.get("imported"),
        post_id: row.get("post_id"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> SqlxRssRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxRssRepository::new(pool)
    }

    fn feed(name: &str, url: &str) -> RssFeed {
        RssFeed {
            id: 0,
            name: name.to_string(),
            url: url.to_string(),
            category_id: None,
            is_active: true,
            last_fetched_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    fn parsed(guid: &str) -> ParsedItem {
        ParsedItem {
            guid: guid.to_string(),
            title: format!("Item {}", guid),
            link: Some(format!("https://irs.example/{}", guid)),
            description: None,
            author: None,
            published_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_feed_crud() {
        let repo = setup_test_repo().await;
        let mut created = repo
            .create_feed(&feed("IRS", "https://irs.example/rss"))
            .await
            .unwrap();

        assert_eq!(
            repo.get_feed_by_url("https://irs.example/rss").await.unwrap().unwrap().id,
            created.id
        );

        created.is_active = false;
        repo.update_feed(&created).await.unwrap();
        assert!(repo.list_active_feeds().await.unwrap().is_empty());
        assert_eq!(repo.list_feeds().await.unwrap().len(), 1);

        assert!(repo.delete_feed(created.id).await.unwrap());
        assert!(repo.get_feed(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_fetch_sets_and_clears_error() {
        let repo = setup_test_repo().await;
        let f = repo.create_feed(&feed("A", "https://a.example/rss")).await.unwrap();

        repo.record_fetch(f.id, Utc::now(), Some("timeout")).await.unwrap();
        let got = repo.get_feed(f.id).await.unwrap().unwrap();
        assert_eq!(got.last_error.as_deref(), Some("timeout"));
        assert!(got.last_fetched_at.is_some());

        repo.record_fetch(f.id, Utc::now(), None).await.unwrap();
        assert!(repo.get_feed(f.id).await.unwrap().unwrap().last_error.is_none());
    }

    #[tokio::test]
    async fn test_insert_item_ignores_duplicates() {
        let repo = setup_test_repo().await;
        let f = repo.create_feed(&feed("A", "https://a.example/rss")).await.unwrap();

        assert!(repo.insert_item(f.id, &parsed("g1")).await.unwrap());
        assert!(!repo.insert_item(f.id, &parsed("g1")).await.unwrap());
        assert!(repo.insert_item(f.id, &parsed("g2")).await.unwrap());

        let filter = ItemFilter {
            feed_id: Some(f.id),
            imported: None,
        };
        assert_eq!(repo.count_items(&filter).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_items_cascade_with_feed() {
        let repo = setup_test_repo().await;
        let f = repo.create_feed(&feed("A", "https://a.example/rss")).await.unwrap();
        repo.insert_item(f.id, &parsed("g1")).await.unwrap();

        repo.delete_feed(f.id).await.unwrap();
        assert_eq!(repo.count_items(&ItemFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_imported_once() {
        let repo = setup_test_repo().await;
        let f = repo.create_feed(&feed("A", "https://a.example/rss")).await.unwrap();
        repo.insert_item(f.id, &parsed("g1")).await.unwrap();
        let item = repo.list_items(&ItemFilter::default(), 0, 10).await.unwrap()[0].clone();
        assert!(!item.imported);

        // post_id has a foreign key, so import against a real post row
        let post_id = create_post_row(&repo).await;
        assert!(repo.mark_imported(item.id, post_id).await.unwrap());
        assert!(!repo.mark_imported(item.id, post_id).await.unwrap());

        let imported = ItemFilter {
            feed_id: None,
            imported: Some(true),
        };
        let items = repo.list_items(&imported, 0, 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].post_id, Some(post_id));
    }

    async fn create_post_row(repo: &SqlxRssRepository) -> i64 {
        let now = Utc::now();
        let pool = repo.pool.sqlite().unwrap();
        sqlx::query(
            "INSERT INTO profiles (id, email, display_name, password_hash, role, status, created_at, updated_at) \
             VALUES (1, 'a@example.com', 'A', 'h', 'admin', 'active', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO posts (slug, title, content, content_html, author_id, status, created_at, updated_at) \
             VALUES ('p', 'P', '', '', 1, 'draft', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }
}
