//! Session repository
//!
//! - `SessionRepository` trait defining the interface for session data access
//! - `SqlxSessionRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<Session>;

    /// Get session by ID (token)
    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete all sessions for a user
    async fn delete_by_user(&self, user_id: i64) -> Result<()>;

    /// Delete sessions that expired before `now`, returning how many
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_session_sqlite(self.pool.sqlite()?, session).await,
            DatabaseDriver::Mysql => create_session_mysql(self.pool.mysql()?, session).await,
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_session_by_id_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_session_by_id_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_session_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => delete_session_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn delete_by_user(&self, user_id: i64) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                delete_sessions_by_user_sqlite(self.pool.sqlite()?, user_id).await
            }
            DatabaseDriver::Mysql => {
                delete_sessions_by_user_mysql(self.pool.mysql()?, user_id).await
            }
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_expired_sessions_sqlite(self.pool.sqlite()?, now).await,
            DatabaseDriver::Mysql => delete_expired_sessions_mysql(self.pool.mysql()?, now).await,
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_session_sqlite(pool: &SqlitePool, session: &Session) -> Result<Session> {
    sqlx::query(
        r#"
        INSERT INTO sessions (id, profile_id, expires_at, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(session.user_id)
    .bind(session.expires_at)
    .bind(session.created_at)
    .execute(pool)
    .await
    .context("Failed to create session")?;

    Ok(session.clone())
}

async fn get_session_by_id_sqlite(pool: &SqlitePool, id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(
        "SELECT id, profile_id, expires_at, created_at FROM sessions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get session by ID")?;

    Ok(row.map(|row| Session {
        id: row.get("id"),
        user_id: row.get("profile_id"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }))
}

async fn delete_session_sqlite(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

async fn delete_sessions_by_user_sqlite(pool: &SqlitePool, user_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE profile_id = ?")
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to delete sessions by user")?;

    Ok(())
}

async fn delete_expired_sessions_sqlite(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_session_mysql(pool: &MySqlPool, session: &Session) -> Result<Session> {
    sqlx::query(
        r#"
        INSERT INTO sessions (id, profile_id, expires_at, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(session.user_id)
    .bind(session.expires_at)
    .bind(session.created_at)
    .execute(pool)
    .await
    .context("Failed to create session")?;

    Ok(session.clone())
}

async fn get_session_by_id_mysql(pool: &MySqlPool, id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(
        "SELECT id, profile_id, expires_at, created_at FROM sessions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get session by ID")?;

    Ok(row.map(|row| Session {
        id: row.get("id"),
        user_id: row.get("profile_id"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }))
}

async fn delete_session_mysql(pool: &MySqlPool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

async fn delete_sessions_by_user_mysql(pool: &MySqlPool, user_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE profile_id = ?")
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to delete sessions by user")?;

    Ok(())
}

async fn delete_expired_sessions_mysql(pool: &MySqlPool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}
