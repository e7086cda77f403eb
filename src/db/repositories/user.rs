//! User (profile) repository
//!
//! - `UserRepository` trait defining the interface for profile data access
//! - `SqlxUserRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{User, UserRole, UserStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, user: &User) -> Result<User>;

    /// Create `user` only if the table is empty; `None` when a profile exists
    async fn create_first(&self, user: &User) -> Result<Option<User>>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Lookup by (lowercased) email
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Persist display name, password hash, role and status
    async fn update(&self, user: &User) -> Result<User>;

    async fn count(&self) -> Result<i64>;

    /// All users, oldest first
    async fn list(&self) -> Result<Vec<User>>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(self.pool.sqlite()?, user).await,
            DatabaseDriver::Mysql => create_user_mysql(self.pool.mysql()?, user).await,
        }
    }

    async fn create_first(&self, user: &User) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_first_user_sqlite(self.pool.sqlite()?, user).await,
            DatabaseDriver::Mysql => create_first_user_mysql(self.pool.mysql()?, user).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_by_id_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_user_by_id_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_by_email_sqlite(self.pool.sqlite()?, email).await,
            DatabaseDriver::Mysql => get_user_by_email_mysql(self.pool.mysql()?, email).await,
        }
    }

    async fn update(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_user_sqlite(self.pool.sqlite()?, user).await,
            DatabaseDriver::Mysql => update_user_mysql(self.pool.mysql()?, user).await,
        }
    }

    async fn count(&self) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => count_users_sqlite(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => count_users_mysql(self.pool.mysql()?).await,
        }
    }

    async fn list(&self) -> Result<Vec<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_users_sqlite(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => list_users_mysql(self.pool.mysql()?).await,
        }
    }
}

const USER_COLUMNS: &str =
    "id, email, display_name, password_hash, role, status, created_at, updated_at";

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO profiles (email, display_name, password_hash, role, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.email)
    .bind(&user.display_name)
    .bind(&user.password_hash)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_rowid(),
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

async fn create_first_user_sqlite(pool: &SqlitePool, user: &User) -> Result<Option<User>> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO profiles (email, display_name, password_hash, role, status, created_at, updated_at)
        SELECT ?, ?, ?, ?, ?, ?, ?
        WHERE NOT EXISTS (SELECT 1 FROM profiles)
        "#,
    )
    .bind(&user.email)
    .bind(&user.display_name)
    .bind(&user.password_hash)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create first user")?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    Ok(Some(User {
        id: result.last_insert_rowid(),
        created_at: now,
        updated_at: now,
        ..user.clone()
    }))
}

async fn get_user_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM profiles WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;

    row.map(|r| row_to_user_sqlite(&r)).transpose()
}

async fn get_user_by_email_sqlite(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM profiles WHERE email = ?", USER_COLUMNS))
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by email")?;

    row.map(|r| row_to_user_sqlite(&r)).transpose()
}

async fn update_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    sqlx::query(
        r#"
        UPDATE profiles
        SET display_name = ?, password_hash = ?, role = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.display_name)
    .bind(&user.password_hash)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(Utc::now())
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    get_user_by_id_sqlite(pool, user.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found after update"))
}

async fn count_users_sqlite(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM profiles")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    Ok(row.get("count"))
}

async fn list_users_sqlite(pool: &SqlitePool) -> Result<Vec<User>> {
    let rows = sqlx::query(&format!("SELECT {} FROM profiles ORDER BY id", USER_COLUMNS))
        .fetch_all(pool)
        .await
        .context("Failed to list users")?;

    rows.iter().map(row_to_user_sqlite).collect()
}

fn row_to_user_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    let role_str: String = row.get("role");
    let status_str: String = row.get("status");

    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        password_hash: row.get("password_hash"),
        role: UserRole::from_str(&role_str)
            .with_context(|| format!("Invalid role in database: {}", role_str))?,
        status: UserStatus::from_str(&status_str).unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO profiles (email, display_name, password_hash, role, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.email)
    .bind(&user.display_name)
    .bind(&user.password_hash)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_id() as i64,
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

async fn create_first_user_mysql(pool: &MySqlPool, user: &User) -> Result<Option<User>> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO profiles (email, display_name, password_hash, role, status, created_at, updated_at)
        SELECT ?, ?, ?, ?, ?, ?, ? FROM DUAL
        WHERE NOT EXISTS (SELECT 1 FROM profiles)
        "#,
    )
    .bind(&user.email)
    .bind(&user.display_name)
    .bind(&user.password_hash)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create first user")?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    Ok(Some(User {
        id: result.last_insert_id() as i64,
        created_at: now,
        updated_at: now,
        ..user.clone()
    }))
}

async fn get_user_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM profiles WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;

    row.map(|r| row_to_user_mysql(&r)).transpose()
}

async fn get_user_by_email_mysql(pool: &MySqlPool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM profiles WHERE email = ?", USER_COLUMNS))
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by email")?;

    row.map(|r| row_to_user_mysql(&r)).transpose()
}

async fn update_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    sqlx::query(
        r#"
        UPDATE profiles
        SET display_name = ?, password_hash = ?, role = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.display_name)
    .bind(&user.password_hash)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(Utc::now())
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    get_user_by_id_mysql(pool, user.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found after update"))
}

async fn count_users_mysql(pool: &MySqlPool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM profiles")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    Ok(row.get("count"))
}

async fn list_users_mysql(pool: &MySqlPool) -> Result<Vec<User>> {
    let rows = sqlx::query(&format!("SELECT {} FROM profiles ORDER BY id", USER_COLUMNS))
        .fetch_all(pool)
        .await
        .context("Failed to list users")?;

    rows.iter().map(row_to_user_mysql).collect()
}

fn row_to_user_mysql(row: &sqlx::mysql::MySqlRow) -> Result<User> {
    let role_str: String = row.get("role");
    let status_str: String = row.get("status");

    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        password_hash: row.get("password_hash"),
        role: UserRole::from_str(&role_str)
            .with_context(|| format!("Invalid role in database: {}", role_str))?,
        status: UserStatus::from_str(&status_str).unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> SqlxUserRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxUserRepository::new(pool)
    }

    fn test_user(email: &str, role: UserRole) -> User {
        User::new(email.to_string(), "Test".to_string(), "hash".to_string(), role)
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let repo = setup_test_repo().await;

        let created = repo
            .create(&test_user("cpa@example.com", UserRole::Admin))
            .await
            .expect("Failed to create user");
        assert!(created.id > 0);

        let by_id = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "cpa@example.com");
        assert_eq!(by_id.role, UserRole::Admin);

        let by_email = repo.get_by_email("cpa@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, created.id);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let repo = setup_test_repo().await;
        repo.create(&test_user("dup@example.com", UserRole::Author))
            .await
            .unwrap();

        let result = repo
            .create(&test_user("dup@example.com", UserRole::Editor))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_first_only_into_empty_table() {
        let repo = setup_test_repo().await;

        let first = repo
            .create_first(&test_user("first@example.com", UserRole::Admin))
            .await
            .unwrap()
            .expect("table was empty");
        assert!(first.id > 0);

        let second = repo
            .create_first(&test_user("second@example.com", UserRole::Admin))
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_role_and_status() {
        let repo = setup_test_repo().await;
        let mut user = repo
            .create(&test_user("a@example.com", UserRole::Author))
            .await
            .unwrap();

        user.role = UserRole::Editor;
        user.status = UserStatus::Disabled;
        let updated = repo.update(&user).await.unwrap();

        assert_eq!(updated.role, UserRole::Editor);
        assert_eq!(updated.status, UserStatus::Disabled);
    }

    #[tokio::test]
    async fn test_count_and_list() {
        let repo = setup_test_repo().await;
        assert_eq!(repo.count().await.unwrap(), 0);

        repo.create(&test_user("a@example.com", UserRole::Admin)).await.unwrap();
        repo.create(&test_user("b@example.com", UserRole::Author)).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 2);
        let users = repo.list().await.unwrap();
        assert_eq!(users[0].email, "a@example.com");
        assert_eq!(users[1].email, "b@example.com");
    }
}
