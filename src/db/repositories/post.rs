//! Post repository
//!
//! - `PostRepository` trait defining the interface for post data access
//! - `SqlxPostRepository` implementing the trait for SQLite and MySQL
//!
//! Category and tag associations are written together with the post inside
//! one transaction and replaced wholesale (delete, then insert).

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Category, Post, PostFilter, PostStatus, PostStatusCounts, Tag};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Post repository trait
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Insert a post and its associations; `id` and timestamps of the input are ignored
    async fn create(&self, post: &Post, category_ids: &[i64], tag_ids: &[i64]) -> Result<Post>;

    /// Get post by ID, with categories and tags
    async fn get_by_id(&self, id: i64) -> Result<Option<Post>>;

    /// Get post by slug, with categories and tags
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Post>>;

    /// Persist every column of `post`. Associations are replaced when given.
    async fn update(
        &self,
        post: &Post,
        category_ids: Option<&[i64]>,
        tag_ids: Option<&[i64]>,
    ) -> Result<Post>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Filtered page of posts, newest first
    async fn list(&self, filter: &PostFilter, offset: i64, limit: i64) -> Result<Vec<Post>>;

    async fn count(&self, filter: &PostFilter) -> Result<i64>;

    /// Whether the slug is taken by a post other than `exclude_id`
    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    /// Flip scheduled posts that are due to published; returns their IDs
    async fn publish_due(&self, now: DateTime<Utc>) -> Result<Vec<i64>>;

    async fn count_by_status(&self) -> Result<PostStatusCounts>;

    /// (slug, updated_at) of every published post, for the sitemap
    async fn published_slugs(&self) -> Result<Vec<(String, DateTime<Utc>)>>;
}

/// SQLx-based post repository implementation
pub struct SqlxPostRepository {
    pool: DynDatabasePool,
}

impl SqlxPostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PostRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl PostRepository for SqlxPostRepository {
    async fn create(&self, post: &Post, category_ids: &[i64], tag_ids: &[i64]) -> Result<Post> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_post_sqlite(self.pool.sqlite()?, post, category_ids, tag_ids).await?
            }
            DatabaseDriver::Mysql => {
                create_post_mysql(self.pool.mysql()?, post, category_ids, tag_ids).await?
            }
        };
        self.get_by_id(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Post not found after create"))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Post>> {
        let filter = Clause::new("p.id = ?", Bind::Int(id));
        Ok(self.select(filter, 0, 1).await?.into_iter().next())
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Post>> {
        let filter = Clause::new("p.slug = ?", Bind::Text(slug.to_string()));
        Ok(self.select(filter, 0, 1).await?.into_iter().next())
    }

    async fn update(
        &self,
        post: &Post,
        category_ids: Option<&[i64]>,
        tag_ids: Option<&[i64]>,
    ) -> Result<Post> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                update_post_sqlite(self.pool.sqlite()?, post, category_ids, tag_ids).await?
            }
            DatabaseDriver::Mysql => {
                update_post_mysql(self.pool.mysql()?, post, category_ids, tag_ids).await?
            }
        }
        self.get_by_id(post.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Post not found after update"))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query("DELETE FROM posts WHERE id = ?")
                    .bind(id)
                    .execute(self.pool.sqlite()?)
                    .await
                    .context("Failed to delete post")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query("DELETE FROM posts WHERE id = ?")
                    .bind(id)
                    .execute(self.pool.mysql()?)
                    .await
                    .context("Failed to delete post")?;
            }
        }
        Ok(())
    }

    async fn list(&self, filter: &PostFilter, offset: i64, limit: i64) -> Result<Vec<Post>> {
        self.select(Clause::from_filter(filter), offset, limit).await
    }

    async fn count(&self, filter: &PostFilter) -> Result<i64> {
        let clause = Clause::from_filter(filter);
        let sql = format!("SELECT COUNT(*) AS count FROM posts p WHERE {}", clause.sql);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = bind_sqlite(sqlx::query(&sql), &clause.binds)
                    .fetch_one(self.pool.sqlite()?)
                    .await
                    .context("Failed to count posts")?;
                Ok(row.get("count"))
            }
            DatabaseDriver::Mysql => {
                let row = bind_mysql(sqlx::query(&sql), &clause.binds)
                    .fetch_one(self.pool.mysql()?)
                    .await
                    .context("Failed to count posts")?;
                Ok(row.get("count"))
            }
        }
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let sql = "SELECT COUNT(*) AS count FROM posts WHERE slug = ? AND id <> ?";
        let exclude = exclude_id.unwrap_or(0);
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(slug)
                .bind(exclude)
                .fetch_one(self.pool.sqlite()?)
                .await
                .context("Failed to check post slug")?
                .get("count"),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(slug)
                .bind(exclude)
                .fetch_one(self.pool.mysql()?)
                .await
                .context("Failed to check post slug")?
                .get("count"),
        };
        Ok(count > 0)
    }

    async fn publish_due(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => publish_due_sqlite(self.pool.sqlite()?, now).await,
            DatabaseDriver::Mysql => publish_due_mysql(self.pool.mysql()?, now).await,
        }
    }

    async fn count_by_status(&self) -> Result<PostStatusCounts> {
        let sql = "SELECT status, COUNT(*) AS count FROM posts GROUP BY status";
        let pairs: Vec<(String, i64)> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to count posts by status")?
                .iter()
                .map(|r| (r.get("status"), r.get("count")))
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to count posts by status")?
                .iter()
                .map(|r| (r.get("status"), r.get("count")))
                .collect(),
        };

        let mut counts = PostStatusCounts::default();
        for (status, count) in pairs {
            match PostStatus::from_str(&status) {
                Ok(PostStatus::Draft) => counts.draft = count,
                Ok(PostStatus::Published) => counts.published = count,
                Ok(PostStatus::Scheduled) => counts.scheduled = count,
                Ok(PostStatus::Archived) => counts.archived = count,
                Err(_) => tracing::warn!("Ignoring unknown post status in database: {}", status),
            }
        }
        Ok(counts)
    }

    async fn published_slugs(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let sql = "SELECT slug, updated_at FROM posts WHERE status = 'published' ORDER BY published_at DESC";
        Ok(match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list published slugs")?
                .iter()
                .map(|r| (r.get("slug"), r.get("updated_at")))
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list published slugs")?
                .iter()
                .map(|r| (r.get("slug"), r.get("updated_at")))
                .collect(),
        })
    }
}

impl SqlxPostRepository {
    /// Load posts matching a WHERE clause, then attach their associations
    async fn select(&self, clause: Clause, offset: i64, limit: i64) -> Result<Vec<Post>> {
        let sql = format!(
            "SELECT {} FROM posts p WHERE {} ORDER BY COALESCE(p.published_at, p.created_at) DESC, p.id DESC LIMIT ? OFFSET ?",
            POST_COLUMNS, clause.sql
        );

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = self.pool.sqlite()?;
                let rows = bind_sqlite(sqlx::query(&sql), &clause.binds)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list posts")?;
                let mut posts = rows
                    .iter()
                    .map(row_to_post_sqlite)
                    .collect::<Result<Vec<_>>>()?;
                attach_relations_sqlite(pool, &mut posts).await?;
                Ok(posts)
            }
            DatabaseDriver::Mysql => {
                let pool = self.pool.mysql()?;
                let rows = bind_mysql(sqlx::query(&sql), &clause.binds)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
                    .context("Failed to list posts")?;
                let mut posts = rows
                    .iter()
                    .map(row_to_post_mysql)
                    .collect::<Result<Vec<_>>>()?;
                attach_relations_mysql(pool, &mut posts).await?;
                Ok(posts)
            }
        }
    }
}

const POST_COLUMNS: &str = "p.id, p.slug, p.title, p.excerpt, p.content, p.content_html, \
    p.featured_image, p.author_id, p.status, p.seo_title, p.seo_description, \
    p.reading_time_minutes, p.published_at, p.scheduled_at, p.created_at, p.updated_at";

// ============================================================================
// Dynamic WHERE clauses
// ============================================================================

#[derive(Debug, Clone)]
enum Bind {
    Int(i64),
    Text(String),
}

/// A SQL condition with its positional bind values
#[derive(Debug, Clone)]
struct Clause {
    sql: String,
    binds: Vec<Bind>,
}

impl Clause {
    fn new(sql: &str, bind: Bind) -> Self {
        Self {
            sql: sql.to_string(),
            binds: vec![bind],
        }
    }

    fn from_filter(filter: &PostFilter) -> Self {
        let mut conditions = vec!["1 = 1".to_string()];
        let mut binds = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("p.status = ?".into());
            binds.push(Bind::Text(status.as_str().to_string()));
        }
        if let Some(author_id) = filter.author_id {
            conditions.push("p.author_id = ?".into());
            binds.push(Bind::Int(author_id));
        }
        if let Some(category_id) = filter.category_id {
            conditions
                .push("p.id IN (SELECT post_id FROM post_categories WHERE category_id = ?)".into());
            binds.push(Bind::Int(category_id));
        }
        if let Some(slug) = &filter.category_slug {
            conditions.push(
                "p.id IN (SELECT pc.post_id FROM post_categories pc \
                 JOIN categories c ON c.id = pc.category_id WHERE c.slug = ?)"
                    .into(),
            );
            binds.push(Bind::Text(slug.clone()));
        }
        if let Some(slug) = &filter.tag_slug {
            conditions.push(
                "p.id IN (SELECT pt.post_id FROM post_tags pt \
                 JOIN tags t ON t.id = pt.tag_id WHERE t.slug = ?)"
                    .into(),
            );
            binds.push(Bind::Text(slug.clone()));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search);
            conditions.push("(p.title LIKE ? OR p.content LIKE ?)".into());
            binds.push(Bind::Text(pattern.clone()));
            binds.push(Bind::Text(pattern));
        }

        Self {
            sql: conditions.join(" AND "),
            binds,
        }
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;
type MysqlQuery<'q> = sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>;

fn bind_sqlite<'q>(mut query: SqliteQuery<'q>, binds: &[Bind]) -> SqliteQuery<'q> {
    for bind in binds {
        query = match bind {
            Bind::Int(v) => query.bind(*v),
            Bind::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn bind_mysql<'q>(mut query: MysqlQuery<'q>, binds: &[Bind]) -> MysqlQuery<'q> {
    for bind in binds {
        query = match bind {
            Bind::Int(v) => query.bind(*v),
            Bind::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn in_placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_post_sqlite(
    pool: &SqlitePool,
    post: &Post,
    category_ids: &[i64],
    tag_ids: &[i64],
) -> Result<i64> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO posts (slug, title, excerpt, content, content_html, featured_image, author_id,
            status, seo_title, seo_description, reading_time_minutes, published_at, scheduled_at,
            created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&post.slug)
    .bind(&post.title)
    .bind(&post.excerpt)
    .bind(&post.content)
    .bind(&post.content_html)
    .bind(&post.featured_image)
    .bind(post.author_id)
    .bind(post.status.as_str())
    .bind(&post.seo_title)
    .bind(&post.seo_description)
    .bind(post.reading_time_minutes)
    .bind(post.published_at)
    .bind(post.scheduled_at)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to create post")?;

    let id = result.last_insert_rowid();

    for category_id in category_ids {
        sqlx::query("INSERT OR IGNORE INTO post_categories (post_id, category_id) VALUES (?, ?)")
            .bind(id)
            .bind(category_id)
            .execute(&mut *tx)
            .await
            .context("Failed to associate category")?;
    }
    for tag_id in tag_ids {
        sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?, ?)")
            .bind(id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await
            .context("Failed to associate tag")?;
    }

    tx.commit().await?;
    Ok(id)
}

async fn update_post_sqlite(
    pool: &SqlitePool,
    post: &Post,
    category_ids: Option<&[i64]>,
    tag_ids: Option<&[i64]>,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE posts
        SET slug = ?, title = ?, excerpt = ?, content = ?, content_html = ?, featured_image = ?,
            status = ?, seo_title = ?, seo_description = ?, reading_time_minutes = ?,
            published_at = ?, scheduled_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&post.slug)
    .bind(&post.title)
    .bind(&post.excerpt)
    .bind(&post.content)
    .bind(&post.content_html)
    .bind(&post.featured_image)
    .bind(post.status.as_str())
    .bind(&post.seo_title)
    .bind(&post.seo_description)
    .bind(post.reading_time_minutes)
    .bind(post.published_at)
    .bind(post.scheduled_at)
    .bind(Utc::now())
    .bind(post.id)
    .execute(&mut *tx)
    .await
    .context("Failed to update post")?;

    if let Some(ids) = category_ids {
        sqlx::query("DELETE FROM post_categories WHERE post_id = ?")
            .bind(post.id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear post categories")?;
        for category_id in ids {
            sqlx::query("INSERT OR IGNORE INTO post_categories (post_id, category_id) VALUES (?, ?)")
                .bind(post.id)
                .bind(category_id)
                .execute(&mut *tx)
                .await
                .context("Failed to associate category")?;
        }
    }
    if let Some(ids) = tag_ids {
        sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
            .bind(post.id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear post tags")?;
        for tag_id in ids {
            sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?, ?)")
                .bind(post.id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await
                .context("Failed to associate tag")?;
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn publish_due_sqlite(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<i64>> {
    let mut tx = pool.begin().await?;

    let ids: Vec<i64> = sqlx::query(
        "SELECT id FROM posts WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?",
    )
    .bind(now)
    .fetch_all(&mut *tx)
    .await
    .context("Failed to find due posts")?
    .iter()
    .map(|r| r.get("id"))
    .collect();

    for id in &ids {
        sqlx::query(
            "UPDATE posts SET status = 'published', published_at = COALESCE(published_at, ?), updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to publish scheduled post")?;
    }

    tx.commit().await?;
    Ok(ids)
}

async fn attach_relations_sqlite(pool: &SqlitePool, posts: &mut [Post]) -> Result<()> {
    if posts.is_empty() {
        return Ok(());
    }
    let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
    let placeholders = in_placeholders(ids.len());

    let sql = format!(
        "SELECT pc.post_id, c.id, c.slug, c.name, c.description, c.created_at \
         FROM post_categories pc JOIN categories c ON c.id = pc.category_id \
         WHERE pc.post_id IN ({}) ORDER BY c.name",
        placeholders
    );
    let mut query = sqlx::query(&sql);
    for id in &ids {
        query = query.bind(*id);
    }
    let mut categories: HashMap<i64, Vec<Category>> = HashMap::new();
    for row in query.fetch_all(pool).await.context("Failed to load post categories")? {
        categories.entry(row.get("post_id")).or_default().push(Category {
            id: row.get("id"),
            slug: row.get("slug"),
            name: row.get("name"),
            description: row.get("description"),
            created_at: row.get("created_at"),
        });
    }

    let sql = format!(
        "SELECT pt.post_id, t.id, t.slug, t.name, t.created_at \
         FROM post_tags pt JOIN tags t ON t.id = pt.tag_id \
         WHERE pt.post_id IN ({}) ORDER BY t.name",
        placeholders
    );
    let mut query = sqlx::query(&sql);
    for id in &ids {
        query = query.bind(*id);
    }
    let mut tags: HashMap<i64, Vec<Tag>> = HashMap::new();
    for row in query.fetch_all(pool).await.context("Failed to load post tags")? {
        tags.entry(row.get("post_id")).or_default().push(Tag {
            id: row.get("id"),
            slug: row.get("slug"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        });
    }

    for post in posts.iter_mut() {
        post.categories = categories.remove(&post.id).unwrap_or_default();
        post.tags = tags.remove(&post.id).unwrap_or_default();
    }
    Ok(())
}

fn row_to_post_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Post> {
    let status: String = row.get("status");
    Ok(Post {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        excerpt: row.get("excerpt"),
        content: row.get("content"),
        content_html: row.get("content_html"),
        featured_image: row.get("featured_image"),
        author_id: row.get("author_id"),
        status: PostStatus::from_str(&status)
            .with_context(|| format!("Invalid post status in database: {}", status))?,
        seo_title: row.get("seo_title"),
        seo_description: row.get("seo_description"),
        reading_time_minutes: row.get("reading_time_minutes"),
        published_at: row.get("published_at"),
        scheduled_at: row.get("scheduled_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        categories: Vec::new(),
        tags: Vec::new(),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_post_mysql(
    pool: &MySqlPool,
    post: &Post,
    category_ids: &[i64],
    tag_ids: &[i64],
) -> Result<i64> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO posts (slug, title, excerpt, content, content_html, featured_image, author_id,
            status, seo_title, seo_description, reading_time_minutes, published_at, scheduled_at,
            created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&post.slug)
    .bind(&post.title)
    .bind(&post.excerpt)
    .bind(&post.content)
    .bind(&post.content_html)
    .bind(&post.featured_image)
    .bind(post.author_id)
    .bind(post.status.as_str())
    .bind(&post.seo_title)
    .bind(&post.seo_description)
    .bind(post.reading_time_minutes)
    .bind(post.published_at)
    .bind(post.scheduled_at)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .context("Failed to create post")?;

    let id = result.last_insert_id() as i64;

    for category_id in category_ids {
        sqlx::query("INSERT IGNORE INTO post_categories (post_id, category_id) VALUES (?, ?)")
            .bind(id)
            .bind(category_id)
            .execute(&mut *tx)
            .await
            .context("Failed to associate category")?;
    }
    for tag_id in tag_ids {
        sqlx::query("INSERT IGNORE INTO post_tags (post_id, tag_id) VALUES (?, ?)")
            .bind(id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await
            .context("Failed to associate tag")?;
    }

    tx.commit().await?;
    Ok(id)
}

async fn update_post_mysql(
    pool: &MySqlPool,
    post: &Post,
    category_ids: Option<&[i64]>,
    tag_ids: Option<&[i64]>,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE posts
        SET slug = ?, title = ?, excerpt = ?, content = ?, content_html = ?, featured_image = ?,
            status = ?, seo_title = ?, seo_description = ?, reading_time_minutes = ?,
            published_at = ?, scheduled_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&post.slug)
    .bind(&post.title)
    .bind(&post.excerpt)
    .bind(&post.content)
    .bind(&post.content_html)
    .bind(&post.featured_image)
    .bind(post.status.as_str())
    .bind(&post.seo_title)
    .bind(&post.seo_description)
    .bind(post.reading_time_minutes)
    .bind(post.published_at)
    .bind(post.scheduled_at)
    .bind(Utc::now())
    .bind(post.id)
    .execute(&mut *tx)
    .await
    .context("Failed to update post")?;

    if let Some(ids) = category_ids {
        sqlx::query("DELETE FROM post_categories WHERE post_id = ?")
            .bind(post.id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear post categories")?;
        for category_id in ids {
            sqlx::query("INSERT IGNORE INTO post_categories (post_id, category_id) VALUES (?, ?)")
                .bind(post.id)
                .bind(category_id)
                .execute(&mut *tx)
                .await
                .context("Failed to associate category")?;
        }
    }
    if let Some(ids) = tag_ids {
        sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
            .bind(post.id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear post tags")?;
        for tag_id in ids {
            sqlx::query("INSERT IGNORE INTO post_tags (post_id, tag_id) VALUES (?, ?)")
                .bind(post.id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await
                .context("Failed to associate tag")?;
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn publish_due_mysql(pool: &MySqlPool, now: DateTime<Utc>) -> Result<Vec<i64>> {
    let mut tx = pool.begin().await?;

    let ids: Vec<i64> = sqlx::query(
        "SELECT id FROM posts WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ? FOR UPDATE",
    )
    .bind(now)
    .fetch_all(&mut *tx)
    .await
    .context("Failed to find due posts")?
    .iter()
    .map(|r| r.get("id"))
    .collect();

    for id in &ids {
        sqlx::query(
            "UPDATE posts SET status = 'published', published_at = COALESCE(published_at, ?), updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to publish scheduled post")?;
    }

    tx.commit().await?;
    Ok(ids)
}

async fn attach_relations_mysql(pool: &MySqlPool, posts: &mut [Post]) -> Result<()> {
    if posts.is_empty() {
        return Ok(());
    }
    let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
    let placeholders = in_placeholders(ids.len());

    let sql = format!(
        "SELECT pc.post_id, c.id, c.slug, c.name, c.description, c.created_at \
         FROM post_categories pc JOIN categories c ON c.id = pc.category_id \
         WHERE pc.post_id IN ({}) ORDER BY c.name",
        placeholders
    );
    let mut query = sqlx::query(&sql);
    for id in &ids {
        query = query.bind(*id);
    }
    let mut categories: HashMap<i64, Vec<Category>> = HashMap::new();
    for row in query.fetch_all(pool).await.context("Failed to load post categories")? {
        categories.entry(row.get("post_id")).or_default().push(Category {
            id: row.get("id"),
            slug: row.get("slug"),
            name: row.get("name"),
            description: row.get("description"),
            created_at: row.get("created_at"),
        });
    }

    let sql = format!(
        "SELECT pt.post_id, t.id, t.slug, t.name, t.created_at \
         FROM post_tags pt JOIN tags t ON t.id = pt.tag_id \
         WHERE pt.post_id IN ({}) ORDER BY t.name",
        placeholders
    );
    let mut query = sqlx::query(&sql);
    for id in &ids {
        query = query.bind(*id);
    }
    let mut tags: HashMap<i64, Vec<Tag>> = HashMap::new();
    for row in query.fetch_all(pool).await.context("Failed to load post tags")? {
        tags.entry(row.get("post_id")).or_default().push(Tag {
            id: row.get("id"),
            slug: row.get("slug"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        });
    }

    for post in posts.iter_mut() {
        post.categories = categories.remove(&post.id).unwrap_or_default();
        post.tags = tags.remove(&post.id).unwrap_or_default();
    }
    Ok(())
}

fn row_to_post_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Post> {
    let status: String = row.get("status");
    Ok(Post {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        excerpt: row.get("excerpt"),
        content: row.get("content"),
        content_html: row.get("content_html"),
        featured_image: row.get("featured_image"),
        author_id: row.get("author_id"),
        status: PostStatus::from_str(&status)
            .with_context(|| format!("Invalid post status in database: {}", status))?,
        seo_title: row.get("seo_title"),
        seo_description: row.get("seo_description"),
        reading_time_minutes: row.get("reading_time_minutes"),
        published_at: row.get("published_at"),
        scheduled_at: row.get("scheduled_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        categories: Vec::new(),
        tags: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{
        CategoryRepository, SqlxCategoryRepository, SqlxTagRepository, SqlxUserRepository,
        TagRepository, UserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{User, UserRole};
    use chrono::Duration;

    struct Fixture {
        repo: SqlxPostRepository,
        author_id: i64,
        category_id: i64,
        tag_id: i64,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let author = SqlxUserRepository::new(pool.clone())
            .create(&User::new("a@example.com".into(), "A".into(), "h".into(), UserRole::Admin))
            .await
            .unwrap();
        let category = SqlxCategoryRepository::new(pool.clone())
            .create(&Category::new("tax".into(), "Tax".into(), None))
            .await
            .unwrap();
        let tag = SqlxTagRepository::new(pool.clone())
            .create(&Tag::new("irs".into(), "IRS".into()))
            .await
            .unwrap();

        Fixture {
            repo: SqlxPostRepository::new(pool),
            author_id: author.id,
            category_id: category.id,
            tag_id: tag.id,
        }
    }

    fn draft(slug: &str, author_id: i64) -> Post {
        let now = Utc::now();
        Post {
            id: 0,
            slug: slug.to_string(),
            title: format!("Title {}", slug),
            excerpt: None,
            content: "Body about deductions".to_string(),
            content_html: "<p>Body about deductions</p>".to_string(),
            featured_image: None,
            author_id,
            status: PostStatus::Draft,
            seo_title: None,
            seo_description: None,
            reading_time_minutes: 1,
            published_at: None,
            scheduled_at: None,
            created_at: now,
            updated_at: now,
            categories: Vec::new(),
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_with_associations() {
        let f = setup().await;
        let post = f
            .repo
            .create(&draft("first", f.author_id), &[f.category_id], &[f.tag_id])
            .await
            .expect("Failed to create post");

        assert!(post.id > 0);
        assert_eq!(post.category_ids(), vec![f.category_id]);
        assert_eq!(post.tags[0].slug, "irs");

        let by_slug = f.repo.get_by_slug("first").await.unwrap().unwrap();
        assert_eq!(by_slug.id, post.id);
        assert_eq!(by_slug.status, PostStatus::Draft);
    }

    #[tokio::test]
    async fn test_update_replaces_associations_wholesale() {
        let f = setup().await;
        let mut post = f
            .repo
            .create(&draft("p", f.author_id), &[f.category_id], &[f.tag_id])
            .await
            .unwrap();

        post.title = "Renamed".into();
        let updated = f.repo.update(&post, Some(&[]), None).await.unwrap();

        assert_eq!(updated.title, "Renamed");
        assert!(updated.categories.is_empty());
        assert_eq!(updated.tags.len(), 1);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let f = setup().await;
        f.repo
            .create(&draft("in-cat", f.author_id), &[f.category_id], &[])
            .await
            .unwrap();
        let mut published = draft("pub", f.author_id);
        published.status = PostStatus::Published;
        published.published_at = Some(Utc::now());
        published.title = "Estimated payments".into();
        f.repo.create(&published, &[], &[f.tag_id]).await.unwrap();

        let by_status = PostFilter::published();
        let posts = f.repo.list(&by_status, 0, 10).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].slug, "pub");

        let by_category = PostFilter {
            category_slug: Some("tax".into()),
            ..PostFilter::default()
        };
        assert_eq!(f.repo.count(&by_category).await.unwrap(), 1);

        let by_tag = PostFilter {
            tag_slug: Some("irs".into()),
            ..PostFilter::default()
        };
        assert_eq!(f.repo.list(&by_tag, 0, 10).await.unwrap()[0].slug, "pub");

        let by_search = PostFilter {
            search: Some("estimated".into()),
            ..PostFilter::default()
        };
        assert_eq!(f.repo.count(&by_search).await.unwrap(), 1);
        assert_eq!(f.repo.count(&PostFilter::default()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_slug_exists_excluding_self() {
        let f = setup().await;
        let post = f.repo.create(&draft("taken", f.author_id), &[], &[]).await.unwrap();

        assert!(f.repo.slug_exists("taken", None).await.unwrap());
        assert!(!f.repo.slug_exists("taken", Some(post.id)).await.unwrap());
        assert!(!f.repo.slug_exists("free", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_due_only_flips_past_schedules() {
        let f = setup().await;
        let now = Utc::now();

        let mut due = draft("due", f.author_id);
        due.status = PostStatus::Scheduled;
        due.scheduled_at = Some(now - Duration::minutes(5));
        let due = f.repo.create(&due, &[], &[]).await.unwrap();

        let mut later = draft("later", f.author_id);
        later.status = PostStatus::Scheduled;
        later.scheduled_at = Some(now + Duration::days(1));
        f.repo.create(&later, &[], &[]).await.unwrap();

        let published = f.repo.publish_due(now).await.unwrap();
        assert_eq!(published, vec![due.id]);

        let reloaded = f.repo.get_by_id(due.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, PostStatus::Published);
        assert!(reloaded.published_at.is_some());

        let counts = f.repo.count_by_status().await.unwrap();
        assert_eq!(counts.published, 1);
        assert_eq!(counts.scheduled, 1);
    }

    #[tokio::test]
    async fn test_delete_post() {
        let f = setup().await;
        let post = f
            .repo
            .create(&draft("gone", f.author_id), &[f.category_id], &[f.tag_id])
            .await
            .unwrap();

        f.repo.delete(post.id).await.unwrap();
        assert!(f.repo.get_by_id(post.id).await.unwrap().is_none());
    }
}
