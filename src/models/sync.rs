//! Offline draft sync operations
//!
//! The admin front end queues edits while offline and pushes them as a batch.
//! Each operation carries a client-generated id so replays are harmless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    SaveDraft,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::SaveDraft => "save_draft",
            SyncAction::Delete => "delete",
        }
    }
}

impl FromStr for SyncAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "save_draft" => Ok(SyncAction::SaveDraft),
            "delete" => Ok(SyncAction::Delete),
            _ => Err(anyhow::anyhow!("Invalid sync action: {}", s)),
        }
    }
}

/// One queued edit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
    pub client_id: String,
    pub action: SyncAction,
    #[serde(default)]
    pub post_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    /// When the client last saw or edited the post
    pub client_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Applied,
    /// The server copy changed after the client's edit; server wins
    Conflict,
    Rejected,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Applied => "applied",
            SyncOutcome::Conflict => "conflict",
            SyncOutcome::Rejected => "rejected",
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(SyncOutcome::Applied),
            "conflict" => Ok(SyncOutcome::Conflict),
            "rejected" => Ok(SyncOutcome::Rejected),
            _ => Err(anyhow::anyhow!("Invalid sync outcome: {}", s)),
        }
    }
}

/// Recorded result of an operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncResult {
    pub client_id: String,
    pub action: SyncAction,
    pub outcome: SyncOutcome,
    pub post_id: Option<i64>,
    pub message: Option<String>,
    /// True when this client_id had already been processed
    #[serde(default)]
    pub duplicate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncBatch {
    pub operations: Vec<SyncOperation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_deserializes_snake_case_action() {
        let op: SyncOperation = serde_json::from_str(
            r#"{"client_id":"c1","action":"save_draft","title":"T","client_updated_at":"2024-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(op.action, SyncAction::SaveDraft);
        assert!(op.post_id.is_none());
    }

    #[test]
    fn test_outcome_from_str() {
        assert_eq!(SyncOutcome::from_str("conflict").unwrap(), SyncOutcome::Conflict);
        assert!(SyncOutcome::from_str("Conflict").is_err());
    }
}
