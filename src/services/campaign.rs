//! Content campaigns
//!
//! A campaign takes one post and produces social copy per platform plus a
//! newsletter, then schedules and sends them. Status transitions are applied
//! with a compare-and-set in the repository so two requests cannot both start
//! a generation or publish twice.

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::config::SiteConfig;
use crate::db::repositories::CampaignRepository;
use crate::models::{
    Campaign, CampaignStatus, CreateCampaignInput, CreateSocialPostInput, GeneratedSocialPost,
    Platform, Post, PublishCampaignInput, SendReport, SocialPost,
};
use crate::services::ai::{AiError, AiService};
use crate::services::newsletter::{NewsletterError, NewsletterService, SendNewsletterInput};
use crate::services::post::{PostService, PostServiceError};
use crate::services::social::{SocialError, SocialService};

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("Campaign not found: {0}")]
    NotFound(i64),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cannot {action} a campaign that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: CampaignStatus,
    },

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Newsletter(#[from] NewsletterError),

    #[error(transparent)]
    Social(#[from] SocialError),

    #[error(transparent)]
    Post(#[from] PostServiceError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// What publishing a campaign did
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub campaign: Campaign,
    pub scheduled: Vec<SocialPost>,
    pub newsletter: Option<SendReport>,
}

pub struct CampaignService {
    repo: Arc<dyn CampaignRepository>,
    posts: Arc<PostService>,
    ai: Arc<AiService>,
    social: Arc<SocialService>,
    newsletter: Arc<NewsletterService>,
    site: SiteConfig,
}

impl CampaignService {
    pub fn new(
        repo: Arc<dyn CampaignRepository>,
        posts: Arc<PostService>,
        ai: Arc<AiService>,
        social: Arc<SocialService>,
        newsletter: Arc<NewsletterService>,
        site: SiteConfig,
    ) -> Self {
        Self {
            repo,
            posts,
            ai,
            social,
            newsletter,
            site,
        }
    }

    pub async fn create(&self, input: CreateCampaignInput) -> Result<Campaign, CampaignError> {
        let post = self.load_post(input.post_id).await?;

        let mut platforms = input.platforms.unwrap_or_else(|| Platform::ALL.to_vec());
        platforms.sort();
        platforms.dedup();
        if platforms.is_empty() {
            return Err(CampaignError::ValidationError(
                "At least one platform is required".to_string(),
            ));
        }

        let name = input
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| post.title.clone());

        let now = Utc::now();
        let campaign = Campaign {
            id: 0,
            name,
            post_id: post.id,
            status: CampaignStatus::Draft,
            platforms,
            social_posts: Vec::new(),
            newsletter_subject: None,
            newsletter_body: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let created = self
            .repo
            .create(&campaign)
            .await
            .context("Failed to create campaign")?;
        tracing::info!("Campaign created: {} (post {})", created.name, created.post_id);
        Ok(created)
    }

    pub async fn get(&self, id: i64) -> Result<Campaign, CampaignError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get campaign")?
            .ok_or(CampaignError::NotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self.repo.list().await.context("Failed to list campaigns")?)
    }

    pub async fn delete(&self, id: i64) -> Result<(), CampaignError> {
        if !self
            .repo
            .delete(id)
            .await
            .context("Failed to delete campaign")?
        {
            return Err(CampaignError::NotFound(id));
        }
        Ok(())
    }

    /// Produce social copy and the newsletter for the campaign's post.
    /// On failure the campaign is left `failed` with the error recorded.
    pub async fn generate(&self, id: i64) -> Result<Campaign, CampaignError> {
        let mut campaign = self.get(id).await?;
        if !campaign.status.can_generate() {
            return Err(CampaignError::InvalidTransition {
                action: "generate",
                status: campaign.status,
            });
        }
        if !self.ai.is_configured() {
            return Err(AiError::NotConfigured.into());
        }
        let post = self.load_post(campaign.post_id).await?;

        let started = self
            .repo
            .transition(
                id,
                &[
                    CampaignStatus::Draft,
                    CampaignStatus::Ready,
                    CampaignStatus::Failed,
                ],
                CampaignStatus::Generating,
            )
            .await
            .context("Failed to update campaign status")?;
        if !started {
            let current = self.get(id).await?;
            return Err(CampaignError::InvalidTransition {
                action: "generate",
                status: current.status,
            });
        }

        match self.generate_copy(&campaign.platforms, &post).await {
            Ok((social_posts, body)) => {
                campaign.status = CampaignStatus::Ready;
                campaign.social_posts = social_posts;
                campaign.newsletter_subject = Some(post.title.clone());
                campaign.newsletter_body = Some(body);
                campaign.error = None;
                campaign.updated_at = Utc::now();
                self.repo
                    .update(&campaign)
                    .await
                    .context("Failed to save campaign")?;
                tracing::info!("Campaign {} generated", campaign.id);
                Ok(campaign)
            }
            Err(e) => {
                tracing::warn!("Campaign {} generation failed: {}", campaign.id, e);
                campaign.status = CampaignStatus::Failed;
                campaign.error = Some(e.to_string());
                campaign.updated_at = Utc::now();
                self.repo
                    .update(&campaign)
                    .await
                    .context("Failed to save campaign")?;
                Err(e.into())
            }
        }
    }

    async fn generate_copy(
        &self,
        platforms: &[Platform],
        post: &Post,
    ) -> Result<(Vec<GeneratedSocialPost>, String), AiError> {
        let url = self.site.absolute_url(&format!("/blog/{}", post.slug));

        let mut social_posts = Vec::with_capacity(platforms.len());
        for &platform in platforms {
            let content = self
                .ai
                .social_post(platform, &post.title, &post.content, Some(&url))
                .await?;
            social_posts.push(GeneratedSocialPost { platform, content });
        }

        let mut body = self.ai.newsletter_body(&post.title, &post.content).await?;
        body.push_str(&format!("\n\n[Read the full article]({})", url));

        Ok((social_posts, body))
    }

    /// Schedule the generated social posts and optionally send the
    /// newsletter. Only a `ready` campaign can be published.
    pub async fn publish(
        &self,
        id: i64,
        input: PublishCampaignInput,
    ) -> Result<PublishReport, CampaignError> {
        let mut campaign = self.get(id).await?;
        if !campaign.status.can_publish() {
            return Err(CampaignError::InvalidTransition {
                action: "publish",
                status: campaign.status,
            });
        }
        if input.send_newsletter && !self.newsletter.is_configured() {
            return Err(NewsletterError::NotConfigured.into());
        }

        let published = self
            .repo
            .transition(id, &[CampaignStatus::Ready], CampaignStatus::Published)
            .await
            .context("Failed to update campaign status")?;
        if !published {
            let current = self.get(id).await?;
            return Err(CampaignError::InvalidTransition {
                action: "publish",
                status: current.status,
            });
        }
        campaign.status = CampaignStatus::Published;

        let scheduled_for = input.scheduled_for.unwrap_or_else(Utc::now);
        let mut scheduled = Vec::with_capacity(campaign.social_posts.len());
        for generated in &campaign.social_posts {
            let created = self
                .social
                .create(CreateSocialPostInput {
                    platform: generated.platform,
                    content: generated.content.clone(),
                    scheduled_for,
                    campaign_id: Some(campaign.id),
                })
                .await;
            match created {
                Ok(post) => scheduled.push(post),
                Err(e) => {
                    self.revert_publish(id, &scheduled).await;
                    return Err(e.into());
                }
            }
        }

        // Sent last: it cannot be taken back
        let newsletter = if input.send_newsletter {
            let subject = campaign
                .newsletter_subject
                .clone()
                .unwrap_or_else(|| campaign.name.clone());
            let body = campaign.newsletter_body.clone().unwrap_or_default();
            match self.newsletter.send(&SendNewsletterInput { subject, body }).await {
                Ok(report) => Some(report),
                Err(e) => {
                    self.revert_publish(id, &scheduled).await;
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        tracing::info!(
            "Campaign {} published: {} social posts, newsletter {}",
            campaign.id,
            scheduled.len(),
            if newsletter.is_some() { "sent" } else { "skipped" }
        );
        Ok(PublishReport {
            campaign,
            scheduled,
            newsletter,
        })
    }

    /// Undo a half-finished publish so it can be retried from `ready`
    async fn revert_publish(&self, id: i64, scheduled: &[SocialPost]) {
        for post in scheduled {
            if let Err(e) = self.social.cancel(post.id).await {
                tracing::warn!("Failed to cancel social post {} of campaign {}: {}", post.id, id, e);
            }
        }
        match self
            .repo
            .transition(id, &[CampaignStatus::Published], CampaignStatus::Ready)
            .await
        {
            Ok(true) => tracing::warn!("Campaign {} publish failed, back to ready", id),
            Ok(false) => tracing::warn!("Campaign {} changed while reverting publish", id),
            Err(e) => tracing::error!("Failed to revert campaign {} to ready: {}", id, e),
        }
    }

    async fn load_post(&self, post_id: i64) -> Result<Post, CampaignError> {
        self.posts
            .get_by_id(post_id)
            .await?
            .ok_or_else(|| CampaignError::ValidationError(format!("Post {} does not exist", post_id)))
    }
}
