//! Post service
//!
//! Business rules for blog posts:
//! - slug generation and uniqueness
//! - Markdown rendering, derived excerpt and reading time
//! - status transitions (publish, schedule) and the scheduled-publish sweep
//! - cached public lookups that only ever expose published posts

use crate::cache::{Cache, CacheLayer, POSTS_PREFIX};
use crate::db::repositories::{CategoryRepository, PostRepository};
use crate::models::{
    CreatePostInput, ListParams, PagedResult, Post, PostFilter, PostStatus, PostStatusCounts,
    UpdatePostInput, User,
};
use crate::services::category::generate_slug;
use crate::services::markdown::{reading_time_minutes, truncate_at_word, MarkdownRenderer, EXCERPT_LENGTH};
use crate::services::tag::{TagService, TagServiceError};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PostServiceError {
    #[error("Post not found: {0}")]
    NotFound(String),

    #[error("Post slug already exists: {0}")]
    DuplicateSlug(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Authors may only change their own posts
    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<TagServiceError> for PostServiceError {
    fn from(err: TagServiceError) -> Self {
        match err {
            TagServiceError::ValidationError(msg) | TagServiceError::NotFound(msg) => {
                PostServiceError::ValidationError(msg)
            }
            TagServiceError::InternalError(e) => PostServiceError::InternalError(e),
        }
    }
}

/// Query for public post listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicPostQuery {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

/// Query for admin post listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminPostQuery {
    #[serde(default)]
    pub status: Option<PostStatus>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

pub struct PostService {
    repo: Arc<dyn PostRepository>,
    categories: Arc<dyn CategoryRepository>,
    tags: Arc<TagService>,
    cache: Arc<Cache>,
    renderer: MarkdownRenderer,
}

impl PostService {
    pub fn new(
        repo: Arc<dyn PostRepository>,
        categories: Arc<dyn CategoryRepository>,
        tags: Arc<TagService>,
        cache: Arc<Cache>,
    ) -> Self {
        Self {
            repo,
            categories,
            tags,
            cache,
            renderer: MarkdownRenderer::new(),
        }
    }

    pub async fn create(
        &self,
        author_id: i64,
        input: CreatePostInput,
    ) -> Result<Post, PostServiceError> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(PostServiceError::ValidationError(
                "Title cannot be empty".to_string(),
            ));
        }

        let slug = self
            .unique_slug(input.slug.as_deref().unwrap_or(&title), None)
            .await?;
        let category_ids = self.check_categories(&input.category_ids).await?;
        let tag_ids = self.tags.resolve_names(&input.tags).await?;

        let now = Utc::now();
        let mut post = Post {
            id: 0,
            slug,
            title,
            excerpt: non_blank(input.excerpt),
            content: input.content,
            content_html: String::new(),
            featured_image: non_blank(input.featured_image),
            author_id,
            status: PostStatus::Draft,
            seo_title: non_blank(input.seo_title),
            seo_description: non_blank(input.seo_description),
            reading_time_minutes: 1,
            published_at: None,
            scheduled_at: input.scheduled_at,
            created_at: now,
            updated_at: now,
            categories: Vec::new(),
            tags: Vec::new(),
        };
        self.render(&mut post);
        apply_status(&mut post, input.status.unwrap_or_default(), now)?;

        let created = self
            .repo
            .create(&post, &category_ids, &tag_ids)
            .await
            .context("Failed to create post")?;
        tracing::info!("Post created: {} ({})", created.slug, created.status);

        self.invalidate_cache().await;
        Ok(created)
    }

    pub async fn update(
        &self,
        actor: &User,
        id: i64,
        input: UpdatePostInput,
    ) -> Result<Post, PostServiceError> {
        let mut post = self.get_editable(actor, id).await?;

        if let Some(title) = input.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(PostServiceError::ValidationError(
                    "Title cannot be empty".to_string(),
                ));
            }
            post.title = title;
        }
        if let Some(slug) = input.slug {
            post.slug = self.unique_slug(&slug, Some(post.id)).await?;
        }
        let content_changed = input.content.is_some();
        if let Some(content) = input.content {
            post.content = content;
        }
        if let Some(excerpt) = input.excerpt {
            post.excerpt = non_blank(Some(excerpt));
        }
        if let Some(image) = input.featured_image {
            post.featured_image = non_blank(Some(image));
        }
        if let Some(seo_title) = input.seo_title {
            post.seo_title = non_blank(Some(seo_title));
        }
        if let Some(seo_description) = input.seo_description {
            post.seo_description = non_blank(Some(seo_description));
        }
        if input.scheduled_at.is_some() {
            post.scheduled_at = input.scheduled_at;
        }
        if content_changed || post.excerpt.is_none() {
            self.render(&mut post);
        }

        let rescheduled = input.scheduled_at.is_some() && post.status == PostStatus::Scheduled;
        if let Some(status) = input.status.or(rescheduled.then_some(PostStatus::Scheduled)) {
            apply_status(&mut post, status, Utc::now())?;
        }

        let category_ids = match input.category_ids {
            Some(ids) => Some(self.check_categories(&ids).await?),
            None => None,
        };
        let tag_ids = match input.tags {
            Some(names) => Some(self.tags.resolve_names(&names).await?),
            None => None,
        };

        let updated = self
            .repo
            .update(&post, category_ids.as_deref(), tag_ids.as_deref())
            .await
            .context("Failed to update post")?;

        self.invalidate_cache().await;
        Ok(updated)
    }

    pub async fn delete(&self, actor: &User, id: i64) -> Result<(), PostServiceError> {
        let post = self.get_editable(actor, id).await?;
        self.repo.delete(post.id).await.context("Failed to delete post")?;
        tracing::info!("Post deleted: {}", post.slug);

        self.invalidate_cache().await;
        Ok(())
    }

    /// Any post, regardless of status
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Post>, PostServiceError> {
        Ok(self
            .repo
            .get_by_id(id)
            .await
            .context("Failed to get post by ID")?)
    }

    pub async fn list_admin(
        &self,
        query: &AdminPostQuery,
    ) -> Result<PagedResult<Post>, PostServiceError> {
        let params = list_params(query.page, query.per_page);
        let filter = PostFilter {
            status: query.status,
            category_id: query.category_id,
            search: query.search.clone().filter(|s| !s.trim().is_empty()),
            ..PostFilter::default()
        };
        self.page(&filter, &params).await
    }

    /// Published post by slug; cached
    pub async fn get_published(&self, slug: &str) -> Result<Option<Post>, PostServiceError> {
        let key = format!("{}slug:{}", POSTS_PREFIX, slug);
        if let Ok(Some(post)) = self.cache.get::<Post>(&key).await {
            return Ok(Some(post));
        }

        let post = self
            .repo
            .get_by_slug(slug)
            .await
            .context("Failed to get post by slug")?
            .filter(Post::is_published);

        if let Some(ref p) = post {
            if let Err(e) = self.cache.set(&key, p, self.cache.default_ttl()).await {
                tracing::warn!("Failed to cache post {}: {}", slug, e);
            }
        }
        Ok(post)
    }

    /// Published posts, optionally filtered by category or tag slug; cached
    pub async fn list_published(
        &self,
        query: &PublicPostQuery,
    ) -> Result<PagedResult<Post>, PostServiceError> {
        let params = list_params(query.page, query.per_page);
        let key = format!(
            "{}list:{}:{}:{}:{}",
            POSTS_PREFIX,
            query.category.as_deref().unwrap_or(""),
            query.tag.as_deref().unwrap_or(""),
            params.page,
            params.per_page
        );
        if let Ok(Some(page)) = self.cache.get::<PagedResult<Post>>(&key).await {
            return Ok(page);
        }

        let filter = PostFilter {
            category_slug: query.category.clone(),
            tag_slug: query.tag.clone(),
            ..PostFilter::published()
        };
        let page = self.page(&filter, &params).await?;

        if let Err(e) = self.cache.set(&key, &page, self.cache.default_ttl()).await {
            tracing::warn!("Failed to cache post list: {}", e);
        }
        Ok(page)
    }

    /// Latest published posts, newest first
    pub async fn latest_published(&self, limit: i64) -> Result<Vec<Post>, PostServiceError> {
        Ok(self
            .repo
            .list(&PostFilter::published(), 0, limit.max(1))
            .await
            .context("Failed to list latest posts")?)
    }

    pub async fn published_slugs(&self) -> Result<Vec<(String, DateTime<Utc>)>, PostServiceError> {
        Ok(self
            .repo
            .published_slugs()
            .await
            .context("Failed to list published slugs")?)
    }

    /// Publish every scheduled post whose time has come
    pub async fn publish_due(&self) -> Result<Vec<i64>, PostServiceError> {
        let ids = self
            .repo
            .publish_due(Utc::now())
            .await
            .context("Failed to publish scheduled posts")?;

        if !ids.is_empty() {
            tracing::info!("Published {} scheduled post(s): {:?}", ids.len(), ids);
            self.invalidate_cache().await;
        }
        Ok(ids)
    }

    pub async fn status_counts(&self) -> Result<PostStatusCounts, PostServiceError> {
        Ok(self
            .repo
            .count_by_status()
            .await
            .context("Failed to count posts")?)
    }

    async fn page(
        &self,
        filter: &PostFilter,
        params: &ListParams,
    ) -> Result<PagedResult<Post>, PostServiceError> {
        let items = self
            .repo
            .list(filter, params.offset(), params.limit())
            .await
            .context("Failed to list posts")?;
        let total = self
            .repo
            .count(filter)
            .await
            .context("Failed to count posts")?;
        Ok(PagedResult::new(items, total, params))
    }

    async fn get_editable(&self, actor: &User, id: i64) -> Result<Post, PostServiceError> {
        let post = self
            .repo
            .get_by_id(id)
            .await
            .context("Failed to get post")?
            .ok_or_else(|| PostServiceError::NotFound(format!("Post with ID {} not found", id)))?;

        if !actor.can_edit(post.author_id) {
            return Err(PostServiceError::Forbidden(
                "Authors can only change their own posts".to_string(),
            ));
        }
        Ok(post)
    }

    async fn unique_slug(
        &self,
        source: &str,
        exclude_id: Option<i64>,
    ) -> Result<String, PostServiceError> {
        let slug = generate_slug(source.trim());
        if slug.is_empty() {
            return Err(PostServiceError::ValidationError(
                "Slug must contain at least one letter or digit".to_string(),
            ));
        }
        if self
            .repo
            .slug_exists(&slug, exclude_id)
            .await
            .context("Failed to check slug uniqueness")?
        {
            return Err(PostServiceError::DuplicateSlug(slug));
        }
        Ok(slug)
    }

    async fn check_categories(&self, ids: &[i64]) -> Result<Vec<i64>, PostServiceError> {
        let mut checked = Vec::with_capacity(ids.len());
        for &id in ids {
            if checked.contains(&id) {
                continue;
            }
            if self
                .categories
                .get_by_id(id)
                .await
                .context("Failed to get category")?
                .is_none()
            {
                return Err(PostServiceError::ValidationError(format!(
                    "Category {} does not exist",
                    id
                )));
            }
            checked.push(id);
        }
        Ok(checked)
    }

    /// Fill the fields derived from `content`
    fn render(&self, post: &mut Post) {
        post.content_html = self.renderer.render(&post.content);
        let text = self.renderer.plain_text(&post.content);
        post.reading_time_minutes = reading_time_minutes(&text);
        if post.excerpt.is_none() && !text.is_empty() {
            post.excerpt = Some(truncate_at_word(&text, EXCERPT_LENGTH));
        }
    }

    async fn invalidate_cache(&self) {
        if let Err(e) = self.cache.invalidate_content().await {
            tracing::warn!("Failed to invalidate content cache: {}", e);
        }
    }
}

/// Move `post` to `status`, maintaining its timestamps
fn apply_status(
    post: &mut Post,
    status: PostStatus,
    now: DateTime<Utc>,
) -> Result<(), PostServiceError> {
    match status {
        PostStatus::Published => {
            post.published_at.get_or_insert(now);
        }
        PostStatus::Scheduled => match post.scheduled_at {
            Some(at) if at > now => {}
            Some(_) => {
                return Err(PostServiceError::ValidationError(
                    "scheduled_at must be in the future".to_string(),
                ))
            }
            None => {
                return Err(PostServiceError::ValidationError(
                    "scheduled_at is required for scheduled posts".to_string(),
                ))
            }
        },
        PostStatus::Draft | PostStatus::Archived => {}
    }
    post.status = status;
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn list_params(page: Option<u32>, per_page: Option<u32>) -> ListParams {
    let defaults = ListParams::default();
    ListParams::new(
        page.unwrap_or(defaults.page),
        per_page.unwrap_or(defaults.per_page),
    )
}
