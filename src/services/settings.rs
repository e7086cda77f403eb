//! Settings service
//!
//! Key/value site settings with typed access to the well-known keys.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::db::repositories::SettingsRepository;
use crate::services::user::normalize_email;

/// Known setting keys
pub mod keys {
    pub const SITE_NAME: &str = "site_name";
    pub const SITE_DESCRIPTION: &str = "site_description";
    pub const CONTACT_EMAIL: &str = "contact_email";
    pub const POSTS_PER_PAGE: &str = "posts_per_page";

    pub const ALL: [&str; 4] = [SITE_NAME, SITE_DESCRIPTION, CONTACT_EMAIL, POSTS_PER_PAGE];
}

/// Site settings structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteSettings {
    pub site_name: String,
    pub site_description: String,
    pub contact_email: String,
    pub posts_per_page: u32,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            site_name: "Ledgerpress Accounting".to_string(),
            site_description: "Tax, bookkeeping and advisory insights".to_string(),
            contact_email: String::new(),
            posts_per_page: 10,
        }
    }
}

/// Partial update; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSettingsInput {
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(default)]
    pub site_description: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub posts_per_page: Option<u32>,
}

#[derive(Debug, Error)]
pub enum SettingsServiceError {
    #[error("Failed to load settings: {0}")]
    LoadError(String),

    #[error("Failed to save settings: {0}")]
    SaveError(String),

    #[error("Invalid setting value: {0}")]
    InvalidValue(String),
}

pub struct SettingsService {
    repo: Arc<dyn SettingsRepository>,
}

impl SettingsService {
    pub fn new(repo: Arc<dyn SettingsRepository>) -> Self {
        Self { repo }
    }

    /// Typed site settings, falling back to defaults for missing or
    /// unparsable values
    pub async fn get_site_settings(&self) -> Result<SiteSettings, SettingsServiceError> {
        let settings = self
            .repo
            .get_many(&keys::ALL)
            .await
            .map_err(|e| SettingsServiceError::LoadError(e.to_string()))?;

        let defaults = SiteSettings::default();
        Ok(SiteSettings {
            site_name: settings
                .get(keys::SITE_NAME)
                .cloned()
                .unwrap_or(defaults.site_name),
            site_description: settings
                .get(keys::SITE_DESCRIPTION)
                .cloned()
                .unwrap_or(defaults.site_description),
            contact_email: settings
                .get(keys::CONTACT_EMAIL)
                .cloned()
                .unwrap_or(defaults.contact_email),
            posts_per_page: settings
                .get(keys::POSTS_PER_PAGE)
                .and_then(|v| v.parse().ok())
                .filter(|n| (1..=100).contains(n))
                .unwrap_or(defaults.posts_per_page),
        })
    }

    /// Validate and store a partial update, returning the new settings
    pub async fn update_site_settings(
        &self,
        input: UpdateSettingsInput,
    ) -> Result<SiteSettings, SettingsServiceError> {
        let mut map = HashMap::new();

        if let Some(name) = input.site_name {
            let name = name.trim();
            if name.is_empty() {
                return Err(SettingsServiceError::InvalidValue(
                    "site_name cannot be empty".to_string(),
                ));
            }
            map.insert(keys::SITE_NAME.to_string(), name.to_string());
        }
        if let Some(description) = input.site_description {
            map.insert(
                keys::SITE_DESCRIPTION.to_string(),
                description.trim().to_string(),
            );
        }
        if let Some(email) = input.contact_email {
            let value = if email.trim().is_empty() {
                String::new()
            } else {
                normalize_email(&email).ok_or_else(|| {
                    SettingsServiceError::InvalidValue(format!("Invalid contact_email: {}", email))
                })?
            };
            map.insert(keys::CONTACT_EMAIL.to_string(), value);
        }
        if let Some(per_page) = input.posts_per_page {
            if !(1..=100).contains(&per_page) {
                return Err(SettingsServiceError::InvalidValue(
                    "posts_per_page must be between 1 and 100".to_string(),
                ));
            }
            map.insert(keys::POSTS_PER_PAGE.to_string(), per_page.to_string());
        }

        if !map.is_empty() {
            self.repo
                .set_many(&map)
                .await
                .map_err(|e| SettingsServiceError::SaveError(e.to_string()))?;
        }

        self.get_site_settings().await
    }

    /// Get a single setting value
    pub async fn get(&self, key: &str) -> Result<Option<String>, SettingsServiceError> {
        let setting = self
            .repo
            .get(key)
            .await
            .map_err(|e| SettingsServiceError::LoadError(e.to_string()))?;
        Ok(setting.map(|s| s.value))
    }

    /// Get all settings as a HashMap
    pub async fn get_all_settings(&self) -> Result<HashMap<String, String>, SettingsServiceError> {
        let settings = self
            .repo
            .get_all()
            .await
            .map_err(|e| SettingsServiceError::LoadError(e.to_string()))?;
        Ok(settings.into_iter().map(|s| (s.key, s.value)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxSettingsRepository;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_service() -> SettingsService {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SettingsService::new(SqlxSettingsRepository::boxed(pool))
    }

    #[tokio::test]
    async fn test_seeded_defaults() {
        let service = setup_test_service().await;
        let settings = service.get_site_settings().await.unwrap();
        assert_eq!(settings, SiteSettings::default());
    }

    #[tokio::test]
    async fn test_partial_update() {
        let service = setup_test_service().await;
        let updated = service
            .update_site_settings(UpdateSettingsInput {
                site_name: Some("  Hart & Co  ".into()),
                contact_email: Some("Hello@HartCo.example".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.site_name, "Hart & Co");
        assert_eq!(updated.contact_email, "hello@hartco.example");
        assert_eq!(updated.posts_per_page, 10);
        assert_eq!(
            service.get(keys::SITE_NAME).await.unwrap().as_deref(),
            Some("Hart & Co")
        );
    }

    #[tokio::test]
    async fn test_invalid_values_rejected() {
        let service = setup_test_service().await;

        for input in [
            UpdateSettingsInput {
                posts_per_page: Some(0),
                ..Default::default()
            },
            UpdateSettingsInput {
                site_name: Some("   ".into()),
                ..Default::default()
            },
            UpdateSettingsInput {
                contact_email: Some("not-an-email".into()),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                service.update_site_settings(input).await,
                Err(SettingsServiceError::InvalidValue(_))
            ));
        }

        let all = service.get_all_settings().await.unwrap();
        assert_eq!(all.get("posts_per_page").map(String::as_str), Some("10"));
    }
}
