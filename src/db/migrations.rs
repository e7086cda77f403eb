//! Database migrations
//!
//! Migrations are embedded in the binary as SQL strings, one variant per
//! driver, and recorded in the `_migrations` table once applied.
//!
//! Timestamp columns that are compared in queries (`scheduled_at`,
//! `expires_at`, `scheduled_for`, ...) are always bound from Rust, never
//! filled by `DEFAULT CURRENT_TIMESTAMP`, so every stored value shares one
//! format.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};

use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_profiles_and_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                display_name VARCHAR(100) NOT NULL,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'author',
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                profile_id INTEGER NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (profile_id) REFERENCES profiles(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_profile_id ON sessions(profile_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                display_name VARCHAR(100) NOT NULL,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'author',
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                profile_id BIGINT NOT NULL,
                expires_at DATETIME(6) NOT NULL,
                created_at DATETIME(6) NOT NULL,
                FOREIGN KEY (profile_id) REFERENCES profiles(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_sessions_profile_id ON sessions(profile_id);
            CREATE INDEX idx_sessions_expires_at ON sessions(expires_at);
        "#,
    },
    Migration {
        version: 2,
        name: "create_categories_and_tags",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug VARCHAR(100) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL UNIQUE,
                description TEXT,
                created_at TIMESTAMP NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug VARCHAR(100) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL UNIQUE,
                created_at TIMESTAMP NOT NULL
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS categories (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                slug VARCHAR(100) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL UNIQUE,
                description TEXT,
                created_at DATETIME(6) NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tags (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                slug VARCHAR(100) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL UNIQUE,
                created_at DATETIME(6) NOT NULL
            );
        "#,
    },
    Migration {
        version: 3,
        name: "create_posts",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug VARCHAR(255) NOT NULL UNIQUE,
                title VARCHAR(255) NOT NULL,
                excerpt TEXT,
                content TEXT NOT NULL,
                content_html TEXT NOT NULL,
                featured_image VARCHAR(500),
                author_id INTEGER NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                seo_title VARCHAR(255),
                seo_description VARCHAR(500),
                reading_time_minutes INTEGER NOT NULL DEFAULT 1,
                published_at TIMESTAMP,
                scheduled_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (author_id) REFERENCES profiles(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_posts_status ON posts(status);
            CREATE INDEX IF NOT EXISTS idx_posts_published_at ON posts(published_at);
            CREATE INDEX IF NOT EXISTS idx_posts_scheduled_at ON posts(scheduled_at);
            CREATE TABLE IF NOT EXISTS post_categories (
                post_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL,
                PRIMARY KEY (post_id, category_id),
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_post_categories_category ON post_categories(category_id);
            CREATE TABLE IF NOT EXISTS post_tags (
                post_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (post_id, tag_id),
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_post_tags_tag ON post_tags(tag_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS posts (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                slug VARCHAR(255) NOT NULL UNIQUE,
                title VARCHAR(255) NOT NULL,
                excerpt TEXT,
                content LONGTEXT NOT NULL,
                content_html LONGTEXT NOT NULL,
                featured_image VARCHAR(500),
                author_id BIGINT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                seo_title VARCHAR(255),
                seo_description VARCHAR(500),
                reading_time_minutes INT NOT NULL DEFAULT 1,
                published_at DATETIME(6) NULL,
                scheduled_at DATETIME(6) NULL,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                FOREIGN KEY (author_id) REFERENCES profiles(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_posts_status ON posts(status);
            CREATE INDEX idx_posts_published_at ON posts(published_at);
            CREATE INDEX idx_posts_scheduled_at ON posts(scheduled_at);
            CREATE TABLE IF NOT EXISTS post_categories (
                post_id BIGINT NOT NULL,
                category_id BIGINT NOT NULL,
                PRIMARY KEY (post_id, category_id),
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_post_categories_category ON post_categories(category_id);
            CREATE TABLE IF NOT EXISTS post_tags (
                post_id BIGINT NOT NULL,
                tag_id BIGINT NOT NULL,
                PRIMARY KEY (post_id, tag_id),
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_post_tags_tag ON post_tags(tag_id);
        "#,
    },
    Migration {
        version: 4,
        name: "create_settings",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS settings (
                key VARCHAR(100) PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            INSERT OR IGNORE INTO settings (key, value) VALUES ('site_name', 'Ledgerpress Accounting');
            INSERT OR IGNORE INTO settings (key, value) VALUES ('site_description', 'Tax, bookkeeping and advisory insights');
            INSERT OR IGNORE INTO settings (key, value) VALUES ('contact_email', '');
            INSERT OR IGNORE INTO settings (key, value) VALUES ('posts_per_page', '10');
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS settings (
                `key` VARCHAR(100) PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6)
            );
            INSERT IGNORE INTO settings (`key`, value) VALUES ('site_name', 'Ledgerpress Accounting');
            INSERT IGNORE INTO settings (`key`, value) VALUES ('site_description', 'Tax, bookkeeping and advisory insights');
            INSERT IGNORE INTO settings (`key`, value) VALUES ('contact_email', '');
            INSERT IGNORE INTO settings (`key`, value) VALUES ('posts_per_page', '10');
        "#,
    },
    Migration {
        version: 5,
        name: "create_newsletter_subscribers",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS newsletter_subscribers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(100),
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                source VARCHAR(50),
                subscribed_at TIMESTAMP NOT NULL,
                unsubscribed_at TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_subscribers_status ON newsletter_subscribers(status);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS newsletter_subscribers (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(100),
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                source VARCHAR(50),
                subscribed_at DATETIME(6) NOT NULL,
                unsubscribed_at DATETIME(6) NULL
            );
            CREATE INDEX idx_subscribers_status ON newsletter_subscribers(status);
        "#,
    },
    Migration {
        version: 6,
        name: "create_rss",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS rss_feeds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(100) NOT NULL,
                url VARCHAR(500) NOT NULL UNIQUE,
                category_id INTEGER,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                last_fetched_at TIMESTAMP,
                last_error TEXT,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE SET NULL
            );
            CREATE TABLE IF NOT EXISTS rss_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_id INTEGER NOT NULL,
                guid VARCHAR(500) NOT NULL,
                title VARCHAR(500) NOT NULL,
                link VARCHAR(500),
                description TEXT,
                author VARCHAR(255),
                published_at TIMESTAMP,
                imported BOOLEAN NOT NULL DEFAULT 0,
                post_id INTEGER,
                created_at TIMESTAMP NOT NULL,
                UNIQUE (feed_id, guid),
                FOREIGN KEY (feed_id) REFERENCES rss_feeds(id) ON DELETE CASCADE,
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rss_items_feed ON rss_items(feed_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS rss_feeds (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(100) NOT NULL,
                url VARCHAR(500) NOT NULL UNIQUE,
                category_id BIGINT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                last_fetched_at DATETIME(6) NULL,
                last_error TEXT,
                created_at DATETIME(6) NOT NULL,
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE SET NULL
            );
            CREATE TABLE IF NOT EXISTS rss_items (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                feed_id BIGINT NOT NULL,
                guid VARCHAR(500) NOT NULL,
                title VARCHAR(500) NOT NULL,
                link VARCHAR(500),
                description TEXT,
                author VARCHAR(255),
                published_at DATETIME(6) NULL,
                imported BOOLEAN NOT NULL DEFAULT FALSE,
                post_id BIGINT NULL,
                created_at DATETIME(6) NOT NULL,
                UNIQUE KEY uq_rss_items_feed_guid (feed_id, guid),
                FOREIGN KEY (feed_id) REFERENCES rss_feeds(id) ON DELETE CASCADE,
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE SET NULL
            );
        "#,
    },
    Migration {
        version: 7,
        name: "create_campaigns_and_social",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(255) NOT NULL,
                post_id INTEGER NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                platforms TEXT NOT NULL,
                social_posts TEXT NOT NULL,
                newsletter_subject VARCHAR(255),
                newsletter_body TEXT,
                error TEXT,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS social_scheduled_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                campaign_id INTEGER,
                platform VARCHAR(20) NOT NULL,
                content TEXT NOT NULL,
                scheduled_for TIMESTAMP NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                posted_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (campaign_id) REFERENCES campaigns(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_social_due ON social_scheduled_posts(status, scheduled_for);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(255) NOT NULL,
                post_id BIGINT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                platforms TEXT NOT NULL,
                social_posts TEXT NOT NULL,
                newsletter_subject VARCHAR(255),
                newsletter_body TEXT,
                error TEXT,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS social_scheduled_posts (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                campaign_id BIGINT NULL,
                platform VARCHAR(20) NOT NULL,
                content TEXT NOT NULL,
                scheduled_for DATETIME(6) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                attempts INT NOT NULL DEFAULT 0,
                last_error TEXT,
                posted_at DATETIME(6) NULL,
                created_at DATETIME(6) NOT NULL,
                FOREIGN KEY (campaign_id) REFERENCES campaigns(id) ON DELETE SET NULL
            );
            CREATE INDEX idx_social_due ON social_scheduled_posts(status, scheduled_for);
        "#,
    },
    Migration {
        version: 8,
        name: "create_sync_operations",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sync_operations (
                client_id VARCHAR(64) PRIMARY KEY,
                action VARCHAR(20) NOT NULL,
                post_id INTEGER,
                outcome VARCHAR(20) NOT NULL,
                message TEXT,
                created_at TIMESTAMP NOT NULL
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS sync_operations (
                client_id VARCHAR(64) PRIMARY KEY,
                action VARCHAR(20) NOT NULL,
                post_id BIGINT NULL,
                outcome VARCHAR(20) NOT NULL,
                message TEXT,
                created_at DATETIME(6) NOT NULL
            );
        "#,
    },
];

/// Run all pending migrations, returning how many were applied
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

/// Create the migrations tracking table if it doesn't exist
async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

async fn get_applied_migrations(pool: &DynDatabasePool) -> Result<Vec<MigrationRecord>> {
    match pool.driver() {
        DatabaseDriver::Sqlite => get_applied_migrations_sqlite(pool.sqlite()?).await,
        DatabaseDriver::Mysql => get_applied_migrations_mysql(pool.mysql()?).await,
    }
}

async fn get_applied_migrations_sqlite(pool: &SqlitePool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        })
        .collect())
}

async fn get_applied_migrations_mysql(pool: &MySqlPool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| MigrationRecord {
            version: row.get::<i32, _>("version") as i64,
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        })
        .collect())
}

async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    match pool.driver() {
        DatabaseDriver::Sqlite => apply_migration_sqlite(pool.sqlite()?, migration).await,
        DatabaseDriver::Mysql => apply_migration_mysql(pool.mysql()?, migration).await,
    }
}

async fn apply_migration_sqlite(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    let mut tx = pool.begin().await?;
    for statement in split_sql_statements(migration.up_sqlite) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(())
}

// MySQL DDL commits implicitly, so there is no transaction here
async fn apply_migration_mysql(pool: &MySqlPool, migration: &Migration) -> Result<()> {
    for statement in split_sql_statements(migration.up_mysql) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, dropping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

/// Check if a string contains only SQL comments
fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Check if migrations are up to date
pub async fn is_up_to_date(pool: &DynDatabasePool) -> Result<bool> {
    Ok(pending_count(pool).await? == 0)
}

/// Get pending migrations count
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    Ok(MIGRATIONS.len().saturating_sub(applied.len()))
}

/// Get the total number of migrations defined
pub fn total_migrations() -> usize {
    MIGRATIONS.len()
}

/// Get migration by version
pub fn get_migration(version: i32) -> Option<&'static Migration> {
    MIGRATIONS.iter().find(|m| m.version == version)
}
