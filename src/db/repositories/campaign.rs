//! Campaign repository
//!
//! `platforms` and `social_posts` are stored as JSON text columns.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Campaign, CampaignStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn create(&self, campaign: &Campaign) -> Result<Campaign>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Campaign>>;

    /// Newest first
    async fn list(&self) -> Result<Vec<Campaign>>;

    /// Persist status, generated content and error
    async fn update(&self, campaign: &Campaign) -> Result<()>;

    /// Move to `to` only if the current status is one of `from`.
    /// Returns false when the campaign was in another state.
    async fn transition(&self, id: i64, from: &[CampaignStatus], to: CampaignStatus)
        -> Result<bool>;

    async fn delete(&self, id: i64) -> Result<bool>;
}

pub struct SqlxCampaignRepository {
    pool: DynDatabasePool,
}

impl SqlxCampaignRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CampaignRepository> {
        Arc::new(Self::new(pool))
    }
}

const COLUMNS: &str = "id, name, post_id, status, platforms, social_posts, newsletter_subject, \
    newsletter_body, error, created_at, updated_at";

#[async_trait]
impl CampaignRepository for SqlxCampaignRepository {
    async fn create(&self, campaign: &Campaign) -> Result<Campaign> {
        let now = Utc::now();
        let platforms = serde_json::to_string(&campaign.platforms)?;
        let social_posts = serde_json::to_string(&campaign.social_posts)?;
        let sql = r#"
            INSERT INTO campaigns (name, post_id, status, platforms, social_posts,
                newsletter_subject, newsletter_body, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&campaign.name)
                .bind(campaign.post_id)
                .bind(campaign.status.as_str())
                .bind(&platforms)
                .bind(&social_posts)
                .bind(&campaign.newsletter_subject)
                .bind(&campaign.newsletter_body)
                .bind(&campaign.error)
                .bind(now)
                .bind(now)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to create campaign")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&campaign.name)
                .bind(campaign.post_id)
                .bind(campaign.status.as_str())
                .bind(&platforms)
                .bind(&social_posts)
                .bind(&campaign.newsletter_subject)
                .bind(&campaign.newsletter_body)
                .bind(&campaign.error)
                .bind(now)
                .bind(now)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to create campaign")?
                .last_insert_id() as i64,
        };

        Ok(Campaign {
            id,
            created_at: now,
            updated_at: now,
            ..campaign.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Campaign>> {
        let sql = format!("SELECT {} FROM campaigns WHERE id = ?", COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get campaign")?
                .map(|r| row_to_campaign_sqlite(&r))
                .transpose(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get campaign")?
                .map(|r| row_to_campaign_mysql(&r))
                .transpose(),
        }
    }

    async fn list(&self) -> Result<Vec<Campaign>> {
        let sql = format!("SELECT {} FROM campaigns ORDER BY created_at DESC, id DESC", COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list campaigns")?
                .iter()
                .map(row_to_campaign_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list campaigns")?
                .iter()
                .map(row_to_campaign_mysql)
                .collect(),
        }
    }

    async fn update(&self, campaign: &Campaign) -> Result<()> {
        let platforms = serde_json::to_string(&campaign.platforms)?;
        let social_posts = serde_json::to_string(&campaign.social_posts)?;
        let sql = r#"
            UPDATE campaigns
            SET name = ?, status = ?, platforms = ?, social_posts = ?, newsletter_subject = ?,
                newsletter_body = ?, error = ?, updated_at = ?
            WHERE id = ?
        "#;

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(&campaign.name)
                    .bind(campaign.status.as_str())
                    .bind(&platforms)
                    .bind(&social_posts)
                    .bind(&campaign.newsletter_subject)
                    .bind(&campaign.newsletter_body)
                    .bind(&campaign.error)
                    .bind(Utc::now())
                    .bind(campaign.id)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to update campaign")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(&campaign.name)
                    .bind(campaign.status.as_str())
                    .bind(&platforms)
                    .bind(&social_posts)
                    .bind(&campaign.newsletter_subject)
                    .bind(&campaign.newsletter_body)
                    .bind(&campaign.error)
                    .bind(Utc::now())
                    .bind(campaign.id)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to update campaign")?;
            }
        }
        Ok(())
    }

    async fn transition(
        &self,
        id: i64,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE campaigns SET status = ?, updated_at = ? WHERE id = ? AND status IN ({})",
            placeholders
        );

        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = sqlx::query(&sql).bind(to.as_str()).bind(Utc::now()).bind(id);
                for status in from {
                    query = query.bind(status.as_str());
                }
                query
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to change campaign status")?
                    .rows_affected()
            }
            DatabaseDriver::Mysql => {
                let mut query = sqlx::query(&sql).bind(to.as_str()).bind(Utc::now()).bind(id);
                for status in from {
                    query = query.bind(status.as_str());
                }
                query
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to change campaign status")?
                    .rows_affected()
            }
        };
        Ok(affected > 0)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM campaigns WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to delete campaign")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to delete campaign")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }
}

fn row_to_campaign_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Campaign> {
    let status: String = row.get("status");
    let platforms: String = row.get("platforms");
    let social_posts: String = row.get("social_posts");
    Ok(Campaign {
        id: row.get("id"),
        name: row.get("name"),
        post_id: row.get("post_id"),
        status: CampaignStatus::from_str(&status)?,
        platforms: serde_json::from_str(&platforms).context("Invalid campaign platforms")?,
        social_posts: serde_json::from_str(&social_posts)
            .context("Invalid campaign social posts")?,
        newsletter_subject: row.get("newsletter_subject"),
        newsletter_body: row.get("newsletter_body"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_campaign_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Campaign> {
    let status: String = row.get("status");
    let platforms: String = row.get("platforms");
    let social_posts: String = row.get("social_posts");
    Ok(Campaign {
        id: row.get("id"),
        name: row.get("name"),
        post_id: row.get("post_id"),
        status: CampaignStatus::from_str(&status)?,
        platforms: serde_json::from_str(&platforms).context("Invalid campaign platforms")?,
        social_posts: serde_json::from_str(&social_posts)
            .context("Invalid campaign social posts")?,
        newsletter_subject: row.get("newsletter_subject"),
        newsletter_body: row.get("newsletter_body"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
