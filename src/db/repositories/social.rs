//! Scheduled social post repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Platform, SocialPost, SocialStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait SocialPostRepository: Send + Sync {
    async fn create(&self, post: &SocialPost) -> Result<SocialPost>;

    async fn get_by_id(&self, id: i64) -> Result<Option<SocialPost>>;

    /// Ordered by `scheduled_for`
    async fn list(&self, status: Option<SocialStatus>, offset: i64, limit: i64)
        -> Result<Vec<SocialPost>>;

    async fn count(&self, status: Option<SocialStatus>) -> Result<i64>;

    /// Cancel a pending post; false when it is no longer pending
    async fn cancel(&self, id: i64) -> Result<bool>;

    /// Pending posts with `scheduled_for <= now`, oldest first
    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<SocialPost>>;

    async fn mark_posted(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Record a failed attempt and push the next try to `next_attempt`
    async fn reschedule(
        &self,
        id: i64,
        attempts: i32,
        next_attempt: DateTime<Utc>,
        error: &str,
    ) -> Result<()>;

    /// Give up on a post after its last attempt
    async fn mark_failed(&self, id: i64, attempts: i32, error: &str) -> Result<()>;
}

pub struct SqlxSocialPostRepository {
    pool: DynDatabasePool,
}

impl SqlxSocialPostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SocialPostRepository> {
        Arc::new(Self::new(pool))
    }

    async fn execute(&self, sql: &str, binds: Binds<'_>) -> Result<u64> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = sqlx::query(sql);
                for bind in binds.0 {
                    query = match bind {
                        B::Int(v) => query.bind(*v),
                        B::Text(v) => query.bind(*v),
                        B::Time(v) => query.bind(*v),
                    };
                }
                query.execute(self.pool.sqlite()?).await?.rows_affected()
            }
            DatabaseDriver::Mysql => {
                let mut query = sqlx::query(sql);
                for bind in binds.0 {
                    query = match bind {
                        B::Int(v) => query.bind(*v),
                        B::Text(v) => query.bind(*v),
                        B::Time(v) => query.bind(*v),
                    };
                }
                query.execute(self.pool.mysql()?).await?.rows_affected()
            }
        };
        Ok(affected)
    }
}

/// Positional values for the update statements
enum B<'a> {
    Int(i64),
    Text(&'a str),
    Time(DateTime<Utc>),
}

struct Binds<'a>(&'a [B<'a>]);

const COLUMNS: &str = "id, campaign_id, platform, content, scheduled_for, status, attempts, \
    last_error, posted_at, created_at";

fn status_clause(status: Option<SocialStatus>) -> &'static str {
    if status.is_some() {
        "WHERE status = ?"
    } else {
        ""
    }
}

#[async_trait]
impl SocialPostRepository for SqlxSocialPostRepository {
    async fn create(&self, post: &SocialPost) -> Result<SocialPost> {
        let now = Utc::now();
        let sql = r#"
            INSERT INTO social_scheduled_posts
                (campaign_id, platform, content, scheduled_for, status, attempts, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
        "#;
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(post.campaign_id)
                .bind(post.platform.as_str())
                .bind(&post.content)
                .bind(post.scheduled_for)
                .bind(post.status.as_str())
                .bind(now)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to create social post")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(post.campaign_id)
                .bind(post.platform.as_str())
                .bind(&post.content)
                .bind(post.scheduled_for)
                .bind(post.status.as_str())
                .bind(now)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to create social post")?
                .last_insert_id() as i64,
        };

        Ok(SocialPost {
            id,
            attempts: 0,
            last_error: None,
            posted_at: None,
            created_at: now,
            ..post.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<SocialPost>> {
        let sql = format!("SELECT {} FROM social_scheduled_posts WHERE id = ?", COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get social post")?
                .map(|r| row_to_social_sqlite(&r))
                .transpose(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get social post")?
                .map(|r| row_to_social_mysql(&r))
                .transpose(),
        }
    }

    async fn list(
        &self,
        status: Option<SocialStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<SocialPost>> {
        let sql = format!(
            "SELECT {} FROM social_scheduled_posts {} ORDER BY scheduled_for ASC, id ASC LIMIT ? OFFSET ?",
            COLUMNS,
            status_clause(status)
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = sqlx::query(&sql);
                if let Some(s) = status {
                    query = query.bind(s.as_str());
                }
                query
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to list social posts")?
                    .iter()
                    .map(row_to_social_sqlite)
                    .collect()
            }
            DatabaseDriver::Mysql => {
                let mut query = sqlx::query(&sql);
                if let Some(s) = status {
                    query = query.bind(s.as_str());
                }
                query
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to list social posts")?
                    .iter()
                    .map(row_to_social_mysql)
                    .collect()
            }
        }
    }

    async fn count(&self, status: Option<SocialStatus>) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS count FROM social_scheduled_posts {}",
            status_clause(status)
        );
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = sqlx::query(&sql);
                if let Some(s) = status {
                    query = query.bind(s.as_str());
                }
                query
                    .fetch_one(self.pool.sqlite()?)
                    .await
                    .context("Failed to count social posts")?
                    .get("count")
            }
            DatabaseDriver::Mysql => {
                let mut query = sqlx::query(&sql);
                if let Some(s) = status {
                    query = query.bind(s.as_str());
                }
                query
                    .fetch_one(self.pool.mysql()?)
                    .await
                    .context("Failed to count social posts")?
                    .get("count")
            }
        };
        Ok(count)
    }

    async fn cancel(&self, id: i64) -> Result<bool> {
        let affected = self
            .execute(
                "UPDATE social_scheduled_posts SET status = 'cancelled' WHERE id = ? AND status = 'pending'",
                Binds(&[B::Int(id)]),
            )
            .await
            .context("Failed to cancel social post")?;
        Ok(affected > 0)
    }

    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<SocialPost>> {
        let sql = format!(
            "SELECT {} FROM social_scheduled_posts WHERE status = 'pending' AND scheduled_for <= ? \
             ORDER BY scheduled_for ASC, id ASC LIMIT ?",
            COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(now)
                .bind(limit)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to load due social posts")?
                .iter()
                .map(row_to_social_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(now)
                .bind(limit)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to load due social posts")?
                .iter()
                .map(row_to_social_mysql)
                .collect(),
        }
    }

    async fn mark_posted(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.execute(
            "UPDATE social_scheduled_posts SET status = 'posted', posted_at = ?, attempts = attempts + 1, last_error = NULL WHERE id = ?",
            Binds(&[B::Time(at), B::Int(id)]),
        )
        .await
        .context("Failed to mark social post posted")?;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: i64,
        attempts: i32,
        next_attempt: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        self.execute(
            "UPDATE social_scheduled_posts SET attempts = ?, scheduled_for = ?, last_error = ? WHERE id = ?",
            Binds(&[
                B::Int(attempts as i64),
                B::Time(next_attempt),
                B::Text(error),
                B::Int(id),
            ]),
        )
        .await
        .context("Failed to reschedule social post")?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, attempts: i32, error: &str) -> Result<()> {
        self.execute(
            "UPDATE social_scheduled_posts SET status = 'failed', attempts = ?, last_error = ? WHERE id = ?",
            Binds(&[B::Int(attempts as i64), B::Text(error), B::Int(id)]),
        )
        .await
        .context("Failed to mark social post failed")?;
        Ok(())
    }
}

fn row_to_social_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<SocialPost> {
    let platform: String = row.get("platform");
    let status: String = row.get("status");
    Ok(SocialPost {
        id: row.get("id"),
        campaign_id: row.get("campaign_id"),
        platform: Platform::from_str(&platform)?,
        content: row.get("content"),
        scheduled_for: row.get("scheduled_for"),
        status: SocialStatus::from_str(&status)?,
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
        posted_at: row.get("posted_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_social_mysql(row: &sqlx::mysql::MySqlRow) -> Result<SocialPost> {
    let platform: String = row.get("platform");
    let status: String = row.get("status");
    Ok(SocialPost {
        id: row.get("id"),
        campaign_id: row.get("campaign_id"),
        platform: Platform::from_str(&platform)?,
        content: row.get("content"),
        scheduled_for: row.get("scheduled_for"),
        status: SocialStatus::from_str(&status)?,
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
        posted_at: row.get("posted_at"),
        created_at: row.get("created_at"),
    })
}
