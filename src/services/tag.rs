//! Tag service
//!
//! Tags are created on demand by name and reused when the name (or the slug
//! derived from it) already exists.

use crate::db::repositories::TagRepository;
use crate::models::{Tag, TagWithCount};
use crate::services::category::generate_slug;
use anyhow::Context;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum TagServiceError {
    #[error("Tag not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct TagService {
    repo: Arc<dyn TagRepository>,
}

impl TagService {
    pub fn new(repo: Arc<dyn TagRepository>) -> Self {
        Self { repo }
    }

    /// Return the tag called `name`, creating it if needed
    pub async fn create_or_get(&self, name: &str) -> Result<Tag, TagServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TagServiceError::ValidationError(
                "Tag name cannot be empty".to_string(),
            ));
        }

        if let Some(existing) = self
            .repo
            .get_by_name(name)
            .await
            .context("Failed to check existing tag")?
        {
            return Ok(existing);
        }

        let slug = generate_slug(name);
        if slug.is_empty() {
            return Err(TagServiceError::ValidationError(format!(
                "Tag name '{}' has no usable characters",
                name
            )));
        }
        // "Sole Trader" and "sole-trader" share a slug
        if let Some(existing) = self
            .repo
            .get_by_slug(&slug)
            .await
            .context("Failed to check existing tag slug")?
        {
            return Ok(existing);
        }

        let created = self
            .repo
            .create(&Tag::new(slug, name.to_string()))
            .await
            .context("Failed to create tag")?;
        tracing::debug!("Created tag {}", created.slug);
        Ok(created)
    }

    /// Resolve a list of names to tag ids, creating missing tags.
    /// Blank names are skipped and duplicates collapse.
    pub async fn resolve_names(&self, names: &[String]) -> Result<Vec<i64>, TagServiceError> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names.iter().filter(|n| !n.trim().is_empty()) {
            let tag = self.create_or_get(name).await?;
            if !ids.contains(&tag.id) {
                ids.push(tag.id);
            }
        }
        Ok(ids)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Tag>, TagServiceError> {
        Ok(self
            .repo
            .get_by_slug(slug)
            .await
            .context("Failed to get tag by slug")?)
    }

    /// Every tag with its usage count
    pub async fn list(&self) -> Result<Vec<TagWithCount>, TagServiceError> {
        Ok(self
            .repo
            .list_with_counts()
            .await
            .context("Failed to list tags")?)
    }

    /// Delete a tag; its post associations go with it
    pub async fn delete(&self, id: i64) -> Result<(), TagServiceError> {
        if self
            .repo
            .get_by_id(id)
            .await
            .context("Failed to get tag")?
            .is_none()
        {
            return Err(TagServiceError::NotFound(format!("Tag with ID {} not found", id)));
        }

        self.repo.delete(id).await.context("Failed to delete tag")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxTagRepository;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_service() -> TagService {
        let pool = create_test_pool()
            .await
            .expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        TagService::new(SqlxTagRepository::boxed(pool))
    }

    #[tokio::test]
    async fn test_create_or_get_reuses_existing() {
        let service = setup_test_service().await;

        let first = service.create_or_get("  VAT Returns ").await.unwrap();
        assert_eq!(first.name, "VAT Returns");
        assert_eq!(first.slug, "vat-returns");

        let again = service.create_or_get("VAT Returns").await.unwrap();
        assert_eq!(again.id, first.id);

        let by_slug = service.create_or_get("vat-returns").await.unwrap();
        assert_eq!(by_slug.id, first.id);
    }

    #[tokio::test]
    async fn test_create_or_get_rejects_blank() {
        let service = setup_test_service().await;
        assert!(matches!(
            service.create_or_get("   ").await,
            Err(TagServiceError::ValidationError(_))
        ));
        assert!(matches!(
            service.create_or_get("!!!").await,
            Err(TagServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_names_dedupes() {
        let service = setup_test_service().await;
        let ids = service
            .resolve_names(&[
                "Payroll".to_string(),
                "".to_string(),
                "payroll".to_string(),
                "Year End".to_string(),
                "Payroll".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);

        let tags = service.list().await.unwrap();
        assert_eq!(tags.len(), 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let service = setup_test_service().await;
        let tag = service.create_or_get("Audit").await.unwrap();

        service.delete(tag.id).await.unwrap();
        assert!(service.get_by_slug("audit").await.unwrap().is_none());

        assert!(matches!(
            service.delete(tag.id).await,
            Err(TagServiceError::NotFound(_))
        ));
    }
}
