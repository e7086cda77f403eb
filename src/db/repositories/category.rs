//! Category repository
//!
//! - `CategoryRepository` trait defining the interface for category data access
//! - `SqlxCategoryRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Category, CategoryWithCount};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Category repository trait
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn create(&self, category: &Category) -> Result<Category>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Category>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Category>>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Category>>;

    /// All categories ordered by name
    async fn list(&self) -> Result<Vec<Category>>;

    /// All categories with the number of posts filed under each
    async fn list_with_counts(&self) -> Result<Vec<CategoryWithCount>>;

    async fn update(&self, category: &Category) -> Result<Category>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Number of posts (any status) filed under a category
    async fn count_posts(&self, id: i64) -> Result<i64>;
}

/// SQLx-based category repository implementation
pub struct SqlxCategoryRepository {
    pool: DynDatabasePool,
}

impl SqlxCategoryRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CategoryRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CategoryRepository for SqlxCategoryRepository {
    async fn create(&self, category: &Category) -> Result<Category> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_category_sqlite(self.pool.sqlite()?, category).await,
            DatabaseDriver::Mysql => create_category_mysql(self.pool.mysql()?, category).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Category>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_category_by_id_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_category_by_id_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_category_where_sqlite(self.pool.sqlite()?, "slug = ?", slug).await
            }
            DatabaseDriver::Mysql => {
                get_category_where_mysql(self.pool.mysql()?, "slug = ?", slug).await
            }
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Category>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_category_where_sqlite(self.pool.sqlite()?, "name = ?", name).await
            }
            DatabaseDriver::Mysql => {
                get_category_where_mysql(self.pool.mysql()?, "name = ?", name).await
            }
        }
    }

    async fn list(&self) -> Result<Vec<Category>> {
        Ok(self
            .list_with_counts()
            .await?
            .into_iter()
            .map(|c| c.category)
            .collect())
    }

    async fn list_with_counts(&self) -> Result<Vec<CategoryWithCount>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_categories_sqlite(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => list_categories_mysql(self.pool.mysql()?).await,
        }
    }

    async fn update(&self, category: &Category) -> Result<Category> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_category_sqlite(self.pool.sqlite()?, category).await,
            DatabaseDriver::Mysql => update_category_mysql(self.pool.mysql()?, category).await,
        }
    }

    async fn delete(&self, id: i64) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_category_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => delete_category_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn count_posts(&self, id: i64) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => count_posts_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => count_posts_mysql(self.pool.mysql()?, id).await,
        }
    }
}

const LIST_WITH_COUNTS: &str = r#"
    SELECT c.id, c.slug, c.name, c.description, c.created_at, COUNT(pc.post_id) AS post_count
    FROM categories c
    LEFT JOIN post_categories pc ON pc.category_id = c.id
    GROUP BY c.id, c.slug, c.name, c.description, c.created_at
    ORDER BY c.name
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_category_sqlite(pool: &SqlitePool, category: &Category) -> Result<Category> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO categories (slug, name, description, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&category.slug)
    .bind(&category.name)
    .bind(&category.description)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create category")?;

    Ok(Category {
        id: result.last_insert_rowid(),
        created_at: now,
        ..category.clone()
    })
}

async fn get_category_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Category>> {
    let row = sqlx::query("SELECT id, slug, name, description, created_at FROM categories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get category by ID")?;

    Ok(row.map(|r| row_to_category_sqlite(&r)))
}

async fn get_category_where_sqlite(
    pool: &SqlitePool,
    condition: &str,
    value: &str,
) -> Result<Option<Category>> {
    let sql = format!(
        "SELECT id, slug, name, description, created_at FROM categories WHERE {}",
        condition
    );
    let row = sqlx::query(&sql)
        .bind(value)
        .fetch_optional(pool)
        .await
        .context("Failed to get category")?;

    Ok(row.map(|r| row_to_category_sqlite(&r)))
}

async fn list_categories_sqlite(pool: &SqlitePool) -> Result<Vec<CategoryWithCount>> {
    let rows = sqlx::query(LIST_WITH_COUNTS)
        .fetch_all(pool)
        .await
        .context("Failed to list categories")?;

    Ok(rows
        .iter()
        .map(|r| CategoryWithCount {
            category: row_to_category_sqlite(r),
            post_count: r.get("post_count"),
        })
        .collect())
}

async fn update_category_sqlite(pool: &SqlitePool, category: &Category) -> Result<Category> {
    sqlx::query("UPDATE categories SET slug = ?, name = ?, description = ? WHERE id = ?")
        .bind(&category.slug)
        .bind(&category.name)
        .bind(&category.description)
        .bind(category.id)
        .execute(pool)
        .await
        .context("Failed to update category")?;

    Ok(category.clone())
}

async fn delete_category_sqlite(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM categories WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete category")?;
    Ok(())
}

async fn count_posts_sqlite(pool: &SqlitePool, id: i64) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM post_categories WHERE category_id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .context("Failed to count category posts")?;
    Ok(row.get("count"))
}

fn row_to_category_sqlite(row: &sqlx::sqlite::SqliteRow) -> Category {
    Category {
        id: row.get("id"),
        slug: row.get("slug"),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_category_mysql(pool: &MySqlPool, category: &Category) -> Result<Category> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO categories (slug, name, description, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&category.slug)
    .bind(&category.name)
    .bind(&category.description)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create category")?;

    Ok(Category {
        id: result.last_insert_id() as i64,
        created_at: now,
        ..category.clone()
    })
}

async fn get_category_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Category>> {
    let row = sqlx::query("SELECT id, slug, name, description, created_at FROM categories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get category by ID")?;

    Ok(row.map(|r| row_to_category_mysql(&r)))
}

async fn get_category_where_mysql(
    pool: &MySqlPool,
    condition: &str,
    value: &str,
) -> Result<Option<Category>> {
    let sql = format!(
        "SELECT id, slug, name, description, created_at FROM categories WHERE {}",
        condition
    );
    let row = sqlx::query(&sql)
        .bind(value)
        .fetch_optional(pool)
        .await
        .context("Failed to get category")?;

    Ok(row.map(|r| row_to_category_mysql(&r)))
}

async fn list_categories_mysql(pool: &MySqlPool) -> Result<Vec<CategoryWithCount>> {
    let rows = sqlx::query(LIST_WITH_COUNTS)
        .fetch_all(pool)
        .await
        .context("Failed to list categories")?;

    Ok(rows
        .iter()
        .map(|r| CategoryWithCount {
            category: row_to_category_mysql(r),
            post_count: r.get("post_count"),
        })
        .collect())
}

async fn update_category_mysql(pool: &MySqlPool, category: &Category) -> Result<Category> {
    sqlx::query("UPDATE categories SET slug = ?, name = ?, description = ? WHERE id = ?")
        .bind(&category.slug)
        .bind(&category.name)
        .bind(&category.description)
        .bind(category.id)
        .execute(pool)
        .await
        .context("Failed to update category")?;

    Ok(category.clone())
}

async fn delete_category_mysql(pool: &MySqlPool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM categories WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete category")?;
    Ok(())
}

async fn count_posts_mysql(pool: &MySqlPool, id: i64) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM post_categories WHERE category_id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .context("Failed to count category posts")?;
    Ok(row.get("count"))
}

fn row_to_category_mysql(row: &sqlx::mysql::MySqlRow) -> Category {
    Category {
        id: row.get("id"),
        slug: row.get("slug"),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> SqlxCategoryRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxCategoryRepository::new(pool)
    }

    fn category(slug: &str, name: &str) -> Category {
        Category::new(slug.to_string(), name.to_string(), None)
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let repo = setup_test_repo().await;
        let created = repo
            .create(&Category::new(
                "tax-planning".into(),
                "Tax Planning".into(),
                Some("Year-round strategies".into()),
            ))
            .await
            .expect("Failed to create category");
        assert!(created.id > 0);

        let by_id = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.description.as_deref(), Some("Year-round strategies"));
        assert_eq!(repo.get_by_slug("tax-planning").await.unwrap().unwrap().id, created.id);
        assert_eq!(repo.get_by_name("Tax Planning").await.unwrap().unwrap().id, created.id);
        assert!(repo.get_by_slug("payroll").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_slug_and_name() {
        let repo = setup_test_repo().await;
        repo.create(&category("tax", "Tax")).await.unwrap();

        assert!(repo.create(&category("tax", "Other")).await.is_err());
        assert!(repo.create(&category("other", "Tax")).await.is_err());
    }

    #[tokio::test]
    async fn test_list_with_counts_includes_empty_categories() {
        let repo = setup_test_repo().await;
        repo.create(&category("payroll", "Payroll")).await.unwrap();
        repo.create(&category("audit", "Audit")).await.unwrap();

        let list = repo.list_with_counts().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].category.name, "Audit");
        assert!(list.iter().all(|c| c.post_count == 0));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let repo = setup_test_repo().await;
        let mut cat = repo.create(&category("old", "Old")).await.unwrap();

        cat.name = "New".into();
        cat.slug = "new".into();
        repo.update(&cat).await.unwrap();
        assert_eq!(repo.get_by_id(cat.id).await.unwrap().unwrap().slug, "new");

        repo.delete(cat.id).await.unwrap();
        assert!(repo.get_by_id(cat.id).await.unwrap().is_none());
        assert_eq!(repo.count_posts(cat.id).await.unwrap(), 0);
    }
}
