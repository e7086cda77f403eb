//! Processed offline-sync operations, keyed by client id

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{SyncAction, SyncOutcome, SyncResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

/// Outcome stored while an operation is being applied
const PENDING: &str = "pending";

#[async_trait]
pub trait SyncRepository: Send + Sync {
    /// Finished result for a client id; in-flight claims are not returned
    async fn get(&self, client_id: &str) -> Result<Option<SyncResult>>;

    /// Reserve a client id. `false` when it was already claimed.
    async fn claim(&self, client_id: &str, action: SyncAction) -> Result<bool>;

    /// Store the result of a claimed operation
    async fn finish(&self, result: &SyncResult) -> Result<()>;

    /// Drop an unfinished claim so the operation can be retried
    async fn release(&self, client_id: &str) -> Result<()>;
}

pub struct SqlxSyncRepository {
    pool: DynDatabasePool,
}

impl SqlxSyncRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SyncRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SyncRepository for SqlxSyncRepository {
    async fn get(&self, client_id: &str) -> Result<Option<SyncResult>> {
        let sql = "SELECT client_id, action, post_id, outcome, message FROM sync_operations WHERE client_id = ? AND outcome <> ?";
        let row = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(client_id)
                .bind(PENDING)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get sync operation")?
                .map(|r| {
                    (
                        r.get::<String, _>("client_id"),
                        r.get::<String, _>("action"),
                        r.get::<Option<i64>, _>("post_id"),
                        r.get::<String, _>("outcome"),
                        r.get::<Option<String>, _>("message"),
                    )
                }),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(client_id)
                .bind(PENDING)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get sync operation")?
                .map(|r| {
                    (
                        r.get::<String, _>("client_id"),
                        r.get::<String, _>("action"),
                        r.get::<Option<i64>, _>("post_id"),
                        r.get::<String, _>("outcome"),
                        r.get::<Option<String>, _>("message"),
                    )
                }),
        };

        row.map(|(client_id, action, post_id, outcome, message)| {
            Ok(SyncResult {
                client_id,
                action: SyncAction::from_str(&action)?,
                outcome: SyncOutcome::from_str(&outcome)?,
                post_id,
                message,
                duplicate: false,
            })
        })
        .transpose()
    }

    async fn claim(&self, client_id: &str, action: SyncAction) -> Result<bool> {
        let inserted = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(
                "INSERT OR IGNORE INTO sync_operations (client_id, action, outcome, created_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(client_id)
            .bind(action.as_str())
            .bind(PENDING)
            .bind(Utc::now())
            .execute(self.pool.sqlite()?)
            .await
            .context("Failed to claim sync operation")?
            .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(
                "INSERT IGNORE INTO sync_operations (client_id, action, outcome, created_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(client_id)
            .bind(action.as_str())
            .bind(PENDING)
            .bind(Utc::now())
            .execute(self.pool.mysql()?)
            .await
            .context("Failed to claim sync operation")?
            .rows_affected(),
        };
        Ok(inserted == 1)
    }

    async fn finish(&self, result: &SyncResult) -> Result<()> {
        let sql = "UPDATE sync_operations SET post_id = ?, outcome = ?, message = ? \
                   WHERE client_id = ? AND outcome = ?";
        let updated = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(result.post_id)
                .bind(result.outcome.as_str())
                .bind(&result.message)
                .bind(&result.client_id)
                .bind(PENDING)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to record sync operation")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(result.post_id)
                .bind(result.outcome.as_str())
                .bind(&result.message)
                .bind(&result.client_id)
                .bind(PENDING)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to record sync operation")?
                .rows_affected(),
        };
        if updated != 1 {
            anyhow::bail!("Sync operation {} was not claimed", result.client_id);
        }
        Ok(())
    }

    async fn release(&self, client_id: &str) -> Result<()> {
        let sql = "DELETE FROM sync_operations WHERE client_id = ? AND outcome = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(client_id)
                    .bind(PENDING)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to release sync operation")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(client_id)
                    .bind(PENDING)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to release sync operation")?;
            }
        }
        Ok(())
    }
}
