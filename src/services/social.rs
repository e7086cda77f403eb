//! Scheduled social posts and their delivery
//!
//! Due posts are POSTed as JSON to the configured webhook (an automation
//! service that talks to the actual networks). Failed deliveries are retried
//! with exponential backoff until `social.max_attempts` is reached.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::SocialConfig;
use crate::db::repositories::SocialPostRepository;
use crate::models::{
    CreateSocialPostInput, ListParams, PagedResult, Platform, SocialPost, SocialStatus,
};

/// Delay before the first retry
pub const BASE_RETRY_DELAY_SECS: u64 = 5;
/// Upper bound of the retry delay
pub const MAX_RETRY_DELAY_SECS: u64 = 3600;

/// Posts handled per dispatcher tick
const DISPATCH_BATCH: i64 = 50;

#[derive(Debug, Error)]
pub enum SocialError {
    #[error("Social post not found: {0}")]
    NotFound(i64),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Social post {0} is not pending")]
    NotPending(i64),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct SocialService {
    repo: Arc<dyn SocialPostRepository>,
}

impl SocialService {
    pub fn new(repo: Arc<dyn SocialPostRepository>) -> Self {
        Self { repo }
    }

    pub async fn list(
        &self,
        status: Option<SocialStatus>,
        params: &ListParams,
    ) -> Result<PagedResult<SocialPost>, SocialError> {
        let items = self
            .repo
            .list(status, params.offset(), params.limit())
            .await
            .context("Failed to list social posts")?;
        let total = self
            .repo
            .count(status)
            .await
            .context("Failed to count social posts")?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn pending_count(&self) -> Result<i64, SocialError> {
        Ok(self
            .repo
            .count(Some(SocialStatus::Pending))
            .await
            .context("Failed to count social posts")?)
    }

    pub async fn create(&self, input: CreateSocialPostInput) -> Result<SocialPost, SocialError> {
        let content = input.content.trim().to_string();
        validate_content(input.platform, &content)?;

        let post = SocialPost {
            id: 0,
            campaign_id: input.campaign_id,
            platform: input.platform,
            content,
            scheduled_for: input.scheduled_for,
            status: SocialStatus::Pending,
            attempts: 0,
            last_error: None,
            posted_at: None,
            created_at: Utc::now(),
        };
        let created = self
            .repo
            .create(&post)
            .await
            .context("Failed to create social post")?;
        tracing::info!(
            "Social post {} scheduled for {} on {}",
            created.id,
            created.platform,
            created.scheduled_for
        );
        Ok(created)
    }

    /// Only pending posts can be cancelled
    pub async fn cancel(&self, id: i64) -> Result<SocialPost, SocialError> {
        if !self
            .repo
            .cancel(id)
            .await
            .context("Failed to cancel social post")?
        {
            return match self.get(id).await {
                Ok(_) => Err(SocialError::NotPending(id)),
                Err(e) => Err(e),
            };
        }
        self.get(id).await
    }

    pub async fn get(&self, id: i64) -> Result<SocialPost, SocialError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get social post")?
            .ok_or(SocialError::NotFound(id))
    }
}

fn validate_content(platform: Platform, content: &str) -> Result<(), SocialError> {
    if content.is_empty() {
        return Err(SocialError::ValidationError(
            "Content cannot be empty".to_string(),
        ));
    }
    let len = content.chars().count();
    if len > platform.max_chars() {
        return Err(SocialError::ValidationError(format!(
            "{} posts are limited to {} characters (got {})",
            platform.display_name(),
            platform.max_chars(),
            len
        )));
    }
    Ok(())
}

/// Delay before retrying after the `attempt`-th failure (1-based):
/// 5 s, 10 s, 20 s, ... capped at one hour
pub fn retry_delay(attempt: i32) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 20) as u32;
    let secs = BASE_RETRY_DELAY_SECS.saturating_mul(1u64 << exponent);
    Duration::from_secs(secs.min(MAX_RETRY_DELAY_SECS))
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    id: i64,
    platform: Platform,
    content: &'a str,
    campaign_id: Option<i64>,
    scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub posted: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Delivers due posts to the webhook
pub struct SocialDispatcher {
    repo: Arc<dyn SocialPostRepository>,
    http: reqwest::Client,
    webhook_url: String,
    max_attempts: i32,
}

impl SocialDispatcher {
    /// `None` when no webhook is configured
    pub fn from_config(
        repo: Arc<dyn SocialPostRepository>,
        config: &SocialConfig,
    ) -> anyhow::Result<Option<Self>> {
        let Some(webhook_url) = config
            .webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
        else {
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Some(Self {
            repo,
            http,
            webhook_url: webhook_url.to_string(),
            max_attempts: config.max_attempts.max(1),
        }))
    }

    /// Deliver every due pending post once
    pub async fn dispatch_due(&self) -> anyhow::Result<DispatchReport> {
        let now = Utc::now();
        let due = self
            .repo
            .due(now, DISPATCH_BATCH)
            .await
            .context("Failed to load due social posts")?;

        let mut report = DispatchReport::default();
        for post in due {
            match self.deliver(&post).await {
                Ok(()) => {
                    self.repo.mark_posted(post.id, Utc::now()).await?;
                    report.posted += 1;
                }
                Err(e) => {
                    let attempts = post.attempts + 1;
                    let error = format!("{:#}", e);
                    if attempts >= self.max_attempts {
                        tracing::warn!(
                            "Social post {} failed permanently after {} attempts: {}",
                            post.id,
                            attempts,
                            error
                        );
                        self.repo.mark_failed(post.id, attempts, &error).await?;
                        report.failed += 1;
                    } else {
                        let delay = chrono::Duration::from_std(retry_delay(attempts))
                            .unwrap_or_else(|_| chrono::Duration::seconds(MAX_RETRY_DELAY_SECS as i64));
                        tracing::warn!(
                            "Social post {} attempt {} failed, retrying in {}s: {}",
                            post.id,
                            attempts,
                            delay.num_seconds(),
                            error
                        );
                        self.repo
                            .reschedule(post.id, attempts, Utc::now() + delay, &error)
                            .await?;
                        report.retried += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    async fn deliver(&self, post: &SocialPost) -> anyhow::Result<()> {
        let payload = WebhookPayload {
            id: post.id,
            platform: post.platform,
            content: &post.content,
            campaign_id: post.campaign_id,
            scheduled_for: post.scheduled_for,
        };
        self.http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("Webhook request failed")?
            .error_for_status()
            .context("Webhook rejected the post")?;
        Ok(())
    }
}
