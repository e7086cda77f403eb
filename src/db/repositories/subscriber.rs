//! Newsletter subscriber repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Subscriber, SubscriberStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    /// Insert an active subscriber. `email` must already be normalized.
    async fn create(&self, email: &str, name: Option<&str>, source: Option<&str>)
        -> Result<Subscriber>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Subscriber>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<Subscriber>>;

    /// Set status, stamping `subscribed_at` or `unsubscribed_at` accordingly
    async fn set_status(&self, id: i64, status: SubscriberStatus) -> Result<()>;

    /// Newest first
    async fn list(
        &self,
        status: Option<SubscriberStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Subscriber>>;

    async fn count(&self, status: Option<SubscriberStatus>) -> Result<i64>;

    /// Every active subscriber, oldest first
    async fn list_active(&self) -> Result<Vec<Subscriber>>;

    async fn delete(&self, id: i64) -> Result<bool>;
}

pub struct SqlxSubscriberRepository {
    pool: DynDatabasePool,
}

impl SqlxSubscriberRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SubscriberRepository> {
        Arc::new(Self::new(pool))
    }
}

const COLUMNS: &str = "id, email, name, status, source, subscribed_at, unsubscribed_at";

/// `WHERE` fragment for an optional status filter
fn status_clause(status: Option<SubscriberStatus>) -> &'static str {
    if status.is_some() {
        "WHERE status = ?"
    } else {
        ""
    }
}

#[async_trait]
impl SubscriberRepository for SqlxSubscriberRepository {
    async fn create(
        &self,
        email: &str,
        name: Option<&str>,
        source: Option<&str>,
    ) -> Result<Subscriber> {
        let now = Utc::now();
        let sql = "INSERT INTO newsletter_subscribers (email, name, status, source, subscribed_at) \
                   VALUES (?, ?, 'active', ?, ?)";
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(email)
                .bind(name)
                .bind(source)
                .bind(now)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to create subscriber")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(email)
                .bind(name)
                .bind(source)
                .bind(now)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to create subscriber")?
                .last_insert_id() as i64,
        };

        Ok(Subscriber {
            id,
            email: email.to_string(),
            name: name.map(str::to_string),
            status: SubscriberStatus::Active,
            source: source.map(str::to_string),
            subscribed_at: now,
            unsubscribed_at: None,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Subscriber>> {
        let sql = format!("SELECT {} FROM newsletter_subscribers WHERE id = ?", COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to get subscriber by ID")?;
                row.map(|r| row_to_subscriber_sqlite(&r)).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to get subscriber by ID")?;
                row.map(|r| row_to_subscriber_mysql(&r)).transpose()
            }
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Subscriber>> {
        let sql = format!("SELECT {} FROM newsletter_subscribers WHERE email = ?", COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(email)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to get subscriber by email")?;
                row.map(|r| row_to_subscriber_sqlite(&r)).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(email)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to get subscriber by email")?;
                row.map(|r| row_to_subscriber_mysql(&r)).transpose()
            }
        }
    }

    async fn set_status(&self, id: i64, status: SubscriberStatus) -> Result<()> {
        let sql = match status {
            SubscriberStatus::Active => {
                "UPDATE newsletter_subscribers SET status = ?, subscribed_at = ?, unsubscribed_at = NULL WHERE id = ?"
            }
            SubscriberStatus::Unsubscribed => {
                "UPDATE newsletter_subscribers SET status = ?, unsubscribed_at = ? WHERE id = ?"
            }
        };
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(status.as_str())
                    .bind(now)
                    .bind(id)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to update subscriber status")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(status.as_str())
                    .bind(now)
                    .bind(id)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to update subscriber status")?;
            }
        }
        Ok(())
    }

    async fn list(
        &self,
        status: Option<SubscriberStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Subscriber>> {
        let sql = format!(
            "SELECT {} FROM newsletter_subscribers {} ORDER BY subscribed_at DESC, id DESC LIMIT ? OFFSET ?",
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
                    .context("Failed to list subscribers")?
                    .iter()
                    .map(row_to_subscriber_sqlite)
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
                    .context("Failed to list subscribers")?
                    .iter()
                    .map(row_to_subscriber_mysql)
                    .collect()
            }
        }
    }

    async fn count(&self, status: Option<SubscriberStatus>) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS count FROM newsletter_subscribers {}",
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
                    .context("Failed to count subscribers")?
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
                    .context("Failed to count subscribers")?
                    .get("count")
            }
        };
        Ok(count)
    }

    async fn list_active(&self) -> Result<Vec<Subscriber>> {
        let sql = format!(
            "SELECT {} FROM newsletter_subscribers WHERE status = 'active' ORDER BY id",
            COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list active subscribers")?
                .iter()
                .map(row_to_subscriber_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list active subscribers")?
                .iter()
                .map(row_to_subscriber_mysql)
                .collect(),
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM newsletter_subscribers WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to delete subscriber")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to delete subscriber")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }
}

fn row_to_subscriber_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Subscriber> {
    let status: String = row.get("status");
    Ok(Subscriber {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        status: SubscriberStatus::from_str(&status)?,
        source: row.get("source"),
        subscribed_at: row.get("subscribed_at"),
        unsubscribed_at: row.get("unsubscribed_at"),
    })
}

fn row_to_subscriber_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Subscriber> {
    let status: String = row.get("status");
    Ok(Subscriber {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        status: SubscriberStatus::from_str(&status)?,
        source: row.get("source"),
        subscribed_at: row.get("subscribed_at"),
        unsubscribed_at: row.get("unsubscribed_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> SqlxSubscriberRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxSubscriberRepository::new(pool)
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let repo = setup_test_repo().await;
        let sub = repo
            .create("jane@example.com", Some("Jane"), Some("footer"))
            .await
            .unwrap();

        let found = repo.get_by_email("jane@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, sub.id);
        assert_eq!(found.status, SubscriberStatus::Active);
        assert_eq!(found.source.as_deref(), Some("footer"));
        assert!(repo.get_by_id(sub.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let repo = setup_test_repo().await;
        repo.create("dup@example.com", None, None).await.unwrap();
        assert!(repo.create("dup@example.com", None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_status_changes_and_filters() {
        let repo = setup_test_repo().await;
        let a = repo.create("a@example.com", None, None).await.unwrap();
        repo.create("b@example.com", None, None).await.unwrap();

        repo.set_status(a.id, SubscriberStatus::Unsubscribed).await.unwrap();
        let a = repo.get_by_id(a.id).await.unwrap().unwrap();
        assert_eq!(a.status, SubscriberStatus::Unsubscribed);
        assert!(a.unsubscribed_at.is_some());

        assert_eq!(repo.count(None).await.unwrap(), 2);
        assert_eq!(repo.count(Some(SubscriberStatus::Active)).await.unwrap(), 1);
        assert_eq!(repo.list_active().await.unwrap()[0].email, "b@example.com");
        assert_eq!(
            repo.list(Some(SubscriberStatus::Unsubscribed), 0, 10)
                .await
                .unwrap()
                .len(),
            1
        );

        repo.set_status(a.id, SubscriberStatus::Active).await.unwrap();
        let a = repo.get_by_id(a.id).await.unwrap().unwrap();
        assert!(a.unsubscribed_at.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = setup_test_repo().await;
        let sub = repo.create("x@example.com", None, None).await.unwrap();
        assert!(repo.delete(sub.id).await.unwrap());
        assert!(!repo.delete(sub.id).await.unwrap());
    }
}
