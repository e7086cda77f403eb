//! Campaign model
//!
//! A campaign is a post plus the social and newsletter copy derived from it.
//! Status moves `draft → generating → ready → published`; a failed
//! generation lands in `failed` and may be retried.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Generating,
    Ready,
    Published,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Generating => "generating",
            CampaignStatus::Ready => "ready",
            CampaignStatus::Published => "published",
            CampaignStatus::Failed => "failed",
        }
    }

    /// Generation may start from draft, and be redone from ready or failed
    pub fn can_generate(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Draft | CampaignStatus::Ready | CampaignStatus::Failed
        )
    }

    pub fn can_publish(&self) -> bool {
        *self == CampaignStatus::Ready
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(CampaignStatus::Draft),
            "generating" => Ok(CampaignStatus::Generating),
            "ready" => Ok(CampaignStatus::Ready),
            "published" => Ok(CampaignStatus::Published),
            "failed" => Ok(CampaignStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid campaign status: {}", s)),
        }
    }
}

/// Generated copy for one platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedSocialPost {
    pub platform: Platform,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub post_id: i64,
    pub status: CampaignStatus,
    pub platforms: Vec<Platform>,
    pub social_posts: Vec<GeneratedSocialPost>,
    pub newsletter_subject: Option<String>,
    pub newsletter_body: Option<String>,
    /// Failure reason of the last generation
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCampaignInput {
    pub post_id: i64,
    /// Defaults to the post title
    #[serde(default)]
    pub name: Option<String>,
    /// Defaults to every platform
    #[serde(default)]
    pub platforms: Option<Vec<Platform>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublishCampaignInput {
    /// When the social posts go out; now when absent
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub send_newsletter: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(CampaignStatus::Draft.can_generate());
        assert!(CampaignStatus::Failed.can_generate());
        assert!(!CampaignStatus::Generating.can_generate());
        assert!(!CampaignStatus::Published.can_generate());

        assert!(CampaignStatus::Ready.can_publish());
        assert!(!CampaignStatus::Draft.can_publish());
        assert!(!CampaignStatus::Published.can_publish());
    }
}
