//! Newsletter subscriber model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    /// Unique, stored lowercased
    pub email: String,
    pub name: Option<String>,
    pub status: SubscriberStatus,
    /// Where the signup came from (footer form, blog sidebar, import)
    pub source: Option<String>,
    pub subscribed_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberStatus {
    #[default]
    Active,
    Unsubscribed,
}

impl SubscriberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriberStatus::Active => "active",
            SubscriberStatus::Unsubscribed => "unsubscribed",
        }
    }
}

impl fmt::Display for SubscriberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriberStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SubscriberStatus::Active),
            "unsubscribed" => Ok(SubscriberStatus::Unsubscribed),
            _ => Err(anyhow::anyhow!("Invalid subscriber status: {}", s)),
        }
    }
}

/// Public signup form payload
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeInput {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Outcome of a newsletter send
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendReport {
    pub sent: usize,
    pub failed: usize,
    /// Addresses that failed, with the delivery error
    pub failures: Vec<SendFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendFailure {
    pub email: String,
    pub error: String,
}
