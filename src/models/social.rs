//! Social platforms and scheduled social posts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Social network a post is written for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linkedin,
    Twitter,
    Facebook,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Linkedin, Platform::Twitter, Platform::Facebook];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linkedin => "linkedin",
            Platform::Twitter => "twitter",
            Platform::Facebook => "facebook",
        }
    }

    /// Hard character limit of the platform
    pub fn max_chars(&self) -> usize {
        match self {
            Platform::Linkedin => 3000,
            Platform::Twitter => 280,
            Platform::Facebook => 2000,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Linkedin => "LinkedIn",
            Platform::Twitter => "X (Twitter)",
            Platform::Facebook => "Facebook",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linkedin" => Ok(Platform::Linkedin),
            "twitter" | "x" => Ok(Platform::Twitter),
            "facebook" => Ok(Platform::Facebook),
            _ => Err(anyhow::anyhow!("Unknown platform: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SocialStatus {
    #[default]
    Pending,
    Posted,
    Failed,
    Cancelled,
}

impl SocialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialStatus::Pending => "pending",
            SocialStatus::Posted => "posted",
            SocialStatus::Failed => "failed",
            SocialStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SocialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SocialStatus::Pending),
            "posted" => Ok(SocialStatus::Posted),
            "failed" => Ok(SocialStatus::Failed),
            "cancelled" => Ok(SocialStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid social post status: {}", s)),
        }
    }
}

/// A social post waiting for (or past) delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialPost {
    pub id: i64,
    pub campaign_id: Option<i64>,
    pub platform: Platform,
    pub content: String,
    /// Next delivery attempt; pushed back on failure
    pub scheduled_for: DateTime<Utc>,
    pub status: SocialStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSocialPostInput {
    pub platform: Platform,
    pub content: String,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default)]
    pub campaign_id: Option<i64>,
}
