//! Category service
//!
//! Create, read, update and delete blog categories. Names and slugs are
//! unique; a category that still has posts filed under it cannot be deleted.

use crate::cache::Cache;
use crate::db::repositories::CategoryRepository;
use crate::models::{Category, CategoryWithCount, CreateCategoryInput, UpdateCategoryInput};
use anyhow::Context;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CategoryServiceError {
    #[error("Category name already exists: {0}")]
    DuplicateName(String),

    #[error("Category slug already exists: {0}")]
    DuplicateSlug(String),

    #[error("Category not found: {0}")]
    NotFound(String),

    /// Posts are still filed under the category
    #[error("Category has {0} post(s) attached")]
    HasPosts(i64),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct CategoryService {
    repo: Arc<dyn CategoryRepository>,
    cache: Arc<Cache>,
}

impl CategoryService {
    pub fn new(repo: Arc<dyn CategoryRepository>, cache: Arc<Cache>) -> Self {
        Self { repo, cache }
    }

    pub async fn create(
        &self,
        input: CreateCategoryInput,
    ) -> Result<Category, CategoryServiceError> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(CategoryServiceError::ValidationError(
                "Category name cannot be empty".to_string(),
            ));
        }

        let slug = match input.slug.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => generate_slug(s),
            Some(_) => {
                return Err(CategoryServiceError::ValidationError(
                    "Category slug cannot be empty".to_string(),
                ))
            }
            None => generate_slug(&name),
        };
        if slug.is_empty() {
            return Err(CategoryServiceError::ValidationError(
                "Category slug cannot be empty".to_string(),
            ));
        }

        if self
            .repo
            .get_by_name(&name)
            .await
            .context("Failed to check name uniqueness")?
            .is_some()
        {
            return Err(CategoryServiceError::DuplicateName(name));
        }
        if self
            .repo
            .get_by_slug(&slug)
            .await
            .context("Failed to check slug uniqueness")?
            .is_some()
        {
            return Err(CategoryServiceError::DuplicateSlug(slug));
        }

        let description = input.description.filter(|d| !d.trim().is_empty());
        let category = Category::new(slug, name, description);
        let created = self
            .repo
            .create(&category)
            .await
            .context("Failed to create category")?;

        self.invalidate_cache().await;
        Ok(created)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Category>, CategoryServiceError> {
        Ok(self
            .repo
            .get_by_id(id)
            .await
            .context("Failed to get category by ID")?)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Category>, CategoryServiceError> {
        Ok(self
            .repo
            .get_by_slug(slug)
            .await
            .context("Failed to get category by slug")?)
    }

    /// All categories with their post counts, ordered by name
    pub async fn list(&self) -> Result<Vec<CategoryWithCount>, CategoryServiceError> {
        Ok(self
            .repo
            .list_with_counts()
            .await
            .context("Failed to list categories")?)
    }

    pub async fn update(
        &self,
        id: i64,
        input: UpdateCategoryInput,
    ) -> Result<Category, CategoryServiceError> {
        let mut category = self
            .repo
            .get_by_id(id)
            .await
            .context("Failed to get category")?
            .ok_or_else(|| CategoryServiceError::NotFound(format!("Category with ID {} not found", id)))?;

        if let Some(name) = input.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(CategoryServiceError::ValidationError(
                    "Category name cannot be empty".to_string(),
                ));
            }
            if name != category.name {
                if let Some(other) = self
                    .repo
                    .get_by_name(&name)
                    .await
                    .context("Failed to check name uniqueness")?
                {
                    if other.id != id {
                        return Err(CategoryServiceError::DuplicateName(name));
                    }
                }
                category.name = name;
            }
        }

        if let Some(slug) = input.slug {
            let slug = generate_slug(slug.trim());
            if slug.is_empty() {
                return Err(CategoryServiceError::ValidationError(
                    "Category slug cannot be empty".to_string(),
                ));
            }
            if slug != category.slug {
                if self
                    .repo
                    .get_by_slug(&slug)
                    .await
                    .context("Failed to check slug uniqueness")?
                    .is_some()
                {
                    return Err(CategoryServiceError::DuplicateSlug(slug));
                }
                category.slug = slug;
            }
        }

        if let Some(description) = input.description {
            category.description = Some(description).filter(|d| !d.trim().is_empty());
        }

        let updated = self
            .repo
            .update(&category)
            .await
            .context("Failed to update category")?;

        self.invalidate_cache().await;
        Ok(updated)
    }

    /// Delete a category; refused while posts are filed under it
    pub async fn delete(&self, id: i64) -> Result<(), CategoryServiceError> {
        if self
            .repo
            .get_by_id(id)
            .await
            .context("Failed to get category")?
            .is_none()
        {
            return Err(CategoryServiceError::NotFound(format!(
                "Category with ID {} not found",
                id
            )));
        }

        let posts = self
            .repo
            .count_posts(id)
            .await
            .context("Failed to count category posts")?;
        if posts > 0 {
            return Err(CategoryServiceError::HasPosts(posts));
        }

        self.repo.delete(id).await.context("Failed to delete category")?;
        self.invalidate_cache().await;
        Ok(())
    }

    async fn invalidate_cache(&self) {
        if let Err(e) = self.cache.invalidate_content().await {
            tracing::warn!("Failed to invalidate content cache: {}", e);
        }
    }
}

/// Generate a URL-friendly slug from a name
///
/// Lowercases, turns spaces and ASCII punctuation into hyphens and collapses
/// runs of hyphens. Non-ASCII letters are kept.
pub fn generate_slug(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || (!c.is_ascii() && c.is_alphanumeric()) {
                c
            } else {
                '-'
            }
        })
        .collect();

    let mut result = String::with_capacity(slug.len());
    let mut prev_hyphen = false;
    for c in slug.chars() {
        if c == '-' {
            if !prev_hyphen && !result.is_empty() {
                result.push(c);
                prev_hyphen = true;
            }
        } else {
            result.push(c);
            prev_hyphen = false;
        }
    }

    result.trim_end_matches('-').to_string()
}
