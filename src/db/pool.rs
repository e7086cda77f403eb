//! Connection pools for the two supported backends
//!
//! Repositories hold a `DynDatabasePool` and pick the concrete sqlx pool with
//! `sqlite()` / `mysql()` after matching on `driver()`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlPool, MySqlPoolOptions},
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DatabaseConfig, DatabaseDriver};

const SQLITE_FILE_CONNECTIONS: u32 = 8;
const MYSQL_CONNECTIONS: u32 = 20;

#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Run a statement that returns no rows
    async fn execute(&self, query: &str) -> Result<u64>;

    /// Round-trip a trivial query
    async fn ping(&self) -> Result<()>;

    /// Wait for checked-out connections and close the pool
    async fn close(&self);

    fn driver(&self) -> DatabaseDriver;

    fn as_sqlite(&self) -> Option<&SqlitePool> {
        None
    }

    fn as_mysql(&self) -> Option<&MySqlPool> {
        None
    }

    fn sqlite(&self) -> Result<&SqlitePool> {
        self.as_sqlite().context("Database driver is not SQLite")
    }

    fn mysql(&self) -> Result<&MySqlPool> {
        self.as_mysql().context("Database driver is not MySQL")
    }
}

pub type DynDatabasePool = Arc<dyn DatabasePool>;

/// Where a SQLite URL points
#[derive(Debug, PartialEq, Eq)]
enum SqliteTarget {
    Memory,
    File { url: String, path: String },
}

impl SqliteTarget {
    fn parse(url: &str) -> Self {
        if url == ":memory:" || url.starts_with("sqlite::memory:") || url.contains("mode=memory") {
            return SqliteTarget::Memory;
        }
        let bare = url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
        let path = bare.split('?').next().unwrap_or(bare).to_string();
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite:{}", url)
        };
        SqliteTarget::File { url, path }
    }

    fn connection_url(&self) -> &str {
        match self {
            SqliteTarget::Memory => "sqlite::memory:",
            SqliteTarget::File { url, .. } => url,
        }
    }
}

pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let target = SqliteTarget::parse(&config.url);

        if let SqliteTarget::File { path, .. } = &target {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        // Foreign keys are per connection
        let options = SqliteConnectOptions::from_str(target.connection_url())
            .with_context(|| format!("Invalid SQLite URL: {}", config.url))?
            .create_if_missing(true)
            .foreign_keys(true);

        // Each in-memory connection would be a separate database
        let max_connections = match target {
            SqliteTarget::Memory => 1,
            SqliteTarget::File { .. } => config.max_connections.unwrap_or(SQLITE_FILE_CONNECTIONS),
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database {}", config.url))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabasePool for SqliteDatabase {
    async fn execute(&self, query: &str) -> Result<u64> {
        let done = sqlx::query(query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute: {}", query))?;
        Ok(done.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("SQLite did not answer")?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn driver(&self) -> DatabaseDriver {
        DatabaseDriver::Sqlite
    }

    fn as_sqlite(&self) -> Option<&SqlitePool> {
        Some(&self.pool)
    }
}

pub struct MysqlDatabase {
    pool: MySqlPool,
}

impl MysqlDatabase {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = if config.url.starts_with("mysql://") {
            config.url.clone()
        } else {
            format!("mysql://{}", config.url)
        };

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(MYSQL_CONNECTIONS))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&url)
            .await
            .context("Failed to connect to MySQL")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabasePool for MysqlDatabase {
    async fn execute(&self, query: &str) -> Result<u64> {
        let done = sqlx::query(query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute: {}", query))?;
        Ok(done.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("MySQL did not answer")?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn driver(&self) -> DatabaseDriver {
        DatabaseDriver::Mysql
    }

    fn as_mysql(&self) -> Option<&MySqlPool> {
        Some(&self.pool)
    }
}

/// Open the configured backend and check that it answers
pub async fn create_pool(config: &DatabaseConfig) -> Result<DynDatabasePool> {
    let pool: DynDatabasePool = match config.driver {
        DatabaseDriver::Sqlite => Arc::new(SqliteDatabase::connect(config).await?),
        DatabaseDriver::Mysql => Arc::new(MysqlDatabase::connect(config).await?),
    };
    pool.ping().await?;
    Ok(pool)
}

/// Fresh in-memory SQLite database
pub async fn create_test_pool() -> Result<DynDatabasePool> {
    create_pool(&DatabaseConfig::in_memory()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_target_parse() {
        assert_eq!(SqliteTarget::parse(":memory:"), SqliteTarget::Memory);
        assert_eq!(SqliteTarget::parse("sqlite::memory:"), SqliteTarget::Memory);
        assert_eq!(
            SqliteTarget::parse("data/ledgerpress.db"),
            SqliteTarget::File {
                url: "sqlite:data/ledgerpress.db".into(),
                path: "data/ledgerpress.db".into(),
            }
        );
        assert_eq!(
            SqliteTarget::parse("sqlite://data/site.db?mode=rwc"),
            SqliteTarget::File {
                url: "sqlite://data/site.db?mode=rwc".into(),
                path: "data/site.db".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_memory_pool() {
        let pool = create_test_pool().await.expect("Failed to create pool");
        assert_eq!(pool.driver(), DatabaseDriver::Sqlite);
        assert!(pool.sqlite().is_ok());
        assert!(pool.mysql().is_err());

        // One connection, so the table is still there for the insert
        pool.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        let inserted = pool
            .execute("INSERT INTO t (name) VALUES ('a'), ('b')")
            .await
            .unwrap();
        assert_eq!(inserted, 2);
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let pool = create_test_pool().await.unwrap();
        pool.execute("CREATE TABLE parent (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        pool.execute("CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL REFERENCES parent(id))")
            .await
            .unwrap();

        assert!(pool
            .execute("INSERT INTO child (parent_id) VALUES (42)")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("site.db");
        let config = DatabaseConfig {
            url: db_path.to_string_lossy().to_string(),
            max_connections: Some(2),
            ..DatabaseConfig::default()
        };

        let pool = create_pool(&config).await.expect("Failed to create pool");
        pool.close().await;
        assert!(db_path.exists());
    }

    #[tokio::test]
    #[ignore = "Requires MySQL server"]
    async fn test_mysql_pool() {
        let config = DatabaseConfig {
            driver: DatabaseDriver::Mysql,
            url: std::env::var("MYSQL_TEST_URL")
                .unwrap_or_else(|_| "mysql://root@localhost/ledgerpress_test".to_string()),
            ..DatabaseConfig::default()
        };
        let pool = create_pool(&config).await.expect("Failed to create pool");
        assert_eq!(pool.driver(), DatabaseDriver::Mysql);
    }
}
