//! Settings repository
//!
//! Key/value storage for site settings editable from the admin dashboard.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;

/// A setting key-value pair
#[derive(Debug, Clone)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Repository trait for settings operations
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Setting>>;

    /// All settings, ordered by key
    async fn get_all(&self) -> Result<Vec<Setting>>;

    /// Values for the given keys; missing keys are absent from the map
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>>;

    /// Insert or overwrite a setting
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write several settings in one transaction
    async fn set_many(&self, settings: &HashMap<String, String>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// SQLx-based settings repository
pub struct SqlxSettingsRepository {
    pool: DynDatabasePool,
}

impl SqlxSettingsRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SettingsRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SettingsRepository for SqlxSettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<Setting>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_sqlite(self.pool.sqlite()?, key).await,
            DatabaseDriver::Mysql => get_mysql(self.pool.mysql()?, key).await,
        }
    }

    async fn get_all(&self) -> Result<Vec<Setting>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_all_sqlite(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => get_all_mysql(self.pool.mysql()?).await,
        }
    }

    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let mut result = HashMap::new();
        for key in keys {
            if let Some(setting) = self.get(key).await? {
                result.insert(setting.key, setting.value);
            }
        }
        Ok(result)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = self.pool.sqlite()?;
                set_sqlite(pool, key, value).await
            }
            DatabaseDriver::Mysql => {
                let pool = self.pool.mysql()?;
                set_mysql(pool, key, value).await
            }
        }
    }

    async fn set_many(&self, settings: &HashMap<String, String>) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut tx = self.pool.sqlite()?.begin().await?;
                for (key, value) in settings {
                    sqlx::query(SQLITE_UPSERT)
                        .bind(key)
                        .bind(value)
                        .bind(Utc::now())
                        .execute(&mut *tx)
                        .await
                        .with_context(|| format!("Failed to save setting {}", key))?;
                }
                tx.commit().await?;
            }
            DatabaseDriver::Mysql => {
                let mut tx = self.pool.mysql()?.begin().await?;
                for (key, value) in settings {
                    sqlx::query(MYSQL_UPSERT)
                        .bind(key)
                        .bind(value)
                        .bind(Utc::now())
                        .execute(&mut *tx)
                        .await
                        .with_context(|| format!("Failed to save setting {}", key))?;
                }
                tx.commit().await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query("DELETE FROM settings WHERE key = ?")
                    .bind(key)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to delete setting")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query("DELETE FROM settings WHERE `key` = ?")
                    .bind(key)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to delete setting")?;
            }
        }
        Ok(())
    }
}

const SQLITE_UPSERT: &str = "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

const MYSQL_UPSERT: &str = "INSERT INTO settings (`key`, value, updated_at) VALUES (?, ?, ?) \
     ON DUPLICATE KEY UPDATE value = VALUES(value), updated_at = VALUES(updated_at)";

// SQLite implementations
async fn get_sqlite(pool: &SqlitePool, key: &str) -> Result<Option<Setting>> {
    let row = sqlx::query("SELECT key, value, updated_at FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("Failed to get setting")?;

    Ok(row.map(|r| Setting {
        key: r.get("key"),
        value: r.get("value"),
        updated_at: r.get("updated_at"),
    }))
}

async fn get_all_sqlite(pool: &SqlitePool) -> Result<Vec<Setting>> {
    let rows = sqlx::query("SELECT key, value, updated_at FROM settings ORDER BY key")
        .fetch_all(pool)
        .await
        .context("Failed to list settings")?;

    Ok(rows
        .into_iter()
        .map(|r| Setting {
            key: r.get("key"),
            value: r.get("value"),
            updated_at: r.get("updated_at"),
        })
        .collect())
}

async fn set_sqlite(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(SQLITE_UPSERT)
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(pool)
        .await
        .context("Failed to save setting")?;
    Ok(())
}

// MySQL implementations
async fn get_mysql(pool: &MySqlPool, key: &str) -> Result<Option<Setting>> {
    let row = sqlx::query("SELECT `key`, value, updated_at FROM settings WHERE `key` = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("Failed to get setting")?;

    Ok(row.map(|r| Setting {
        key: r.get("key"),
        value: r.get("value"),
        updated_at: r.get("updated_at"),
    }))
}

async fn get_all_mysql(pool: &MySqlPool) -> Result<Vec<Setting>> {
    let rows = sqlx::query("SELECT `key`, value, updated_at FROM settings ORDER BY `key`")
        .fetch_all(pool)
        .await
        .context("Failed to list settings")?;

    Ok(rows
        .into_iter()
        .map(|r| Setting {
            key: r.get("key"),
            value: r.get("value"),
            updated_at: r.get("updated_at"),
        })
        .collect())
}

async fn set_mysql(pool: &MySqlPool, key: &str, value: &str) -> Result<()> {
    sqlx::query(MYSQL_UPSERT)
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(pool)
        .await
        .context("Failed to save setting")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> SqlxSettingsRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxSettingsRepository::new(pool)
    }

    #[tokio::test]
    async fn test_seeded_defaults() {
        let repo = setup_test_repo().await;
        let name = repo.get("site_name").await.unwrap().expect("seeded");
        assert_eq!(name.value, "Ledgerpress Accounting");
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let repo = setup_test_repo().await;
        repo.set("site_name", "Acme CPA").await.unwrap();
        repo.set("site_name", "Acme Tax").await.unwrap();

        assert_eq!(repo.get("site_name").await.unwrap().unwrap().value, "Acme Tax");
    }

    #[tokio::test]
    async fn test_set_many_and_get_many() {
        let repo = setup_test_repo().await;
        let mut values = HashMap::new();
        values.insert("contact_email".to_string(), "hi@acme.test".to_string());
        values.insert("phone".to_string(), "555-0100".to_string());
        repo.set_many(&values).await.unwrap();

        let got = repo.get_many(&["contact_email", "phone", "missing"]).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got["phone"], "555-0100");
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = setup_test_repo().await;
        repo.set("temp", "1").await.unwrap();
        repo.delete("temp").await.unwrap();
        assert!(repo.get("temp").await.unwrap().is_none());
        assert!(repo.get_all().await.unwrap().iter().all(|s| s.key != "temp"));
    }
}
