//! Offline draft sync
//!
//! Applies batches of edits queued by the admin front end while offline.
//! Each `client_id` is applied at most once; replays return the stored
//! result flagged as a duplicate. The server copy wins when it changed after
//! the client's edit.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::db::repositories::SyncRepository;
use crate::models::{
    CreatePostInput, PostStatus, SyncAction, SyncBatch, SyncOperation, SyncOutcome, SyncResult,
    UpdatePostInput, User,
};
use crate::services::post::{PostService, PostServiceError};

/// Largest batch accepted in one request
pub const MAX_BATCH_SIZE: usize = 200;

const CLAIM_WAIT_ROUNDS: usize = 50;
const CLAIM_WAIT_STEP: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct SyncService {
    repo: Arc<dyn SyncRepository>,
    posts: Arc<PostService>,
}

impl SyncService {
    pub fn new(repo: Arc<dyn SyncRepository>, posts: Arc<PostService>) -> Self {
        Self { repo, posts }
    }

    /// Apply operations in order and return one result per operation
    pub async fn apply_batch(
        &self,
        actor: &User,
        batch: SyncBatch,
    ) -> Result<Vec<SyncResult>, SyncError> {
        if batch.operations.len() > MAX_BATCH_SIZE {
            return Err(SyncError::ValidationError(format!(
                "At most {} operations per batch",
                MAX_BATCH_SIZE
            )));
        }

        let mut results = Vec::with_capacity(batch.operations.len());
        for op in batch.operations {
            results.push(self.apply(actor, op).await?);
        }

        let applied = results
            .iter()
            .filter(|r| r.outcome == SyncOutcome::Applied && !r.duplicate)
            .count();
        tracing::info!(
            "Sync batch from {}: {} operations, {} applied",
            actor.email,
            results.len(),
            applied
        );
        Ok(results)
    }

    async fn apply(&self, actor: &User, op: SyncOperation) -> Result<SyncResult, SyncError> {
        let client_id = op.client_id.trim().to_string();
        if client_id.is_empty() {
            // Unrecordable without an id
            return Ok(SyncResult {
                client_id,
                action: op.action,
                outcome: SyncOutcome::Rejected,
                post_id: op.post_id,
                message: Some("client_id is required".to_string()),
                duplicate: false,
            });
        }

        let claimed = self
            .repo
            .claim(&client_id, op.action)
            .await
            .context("Failed to claim sync operation")?;
        if !claimed {
            return self.wait_for_result(client_id, op).await;
        }

        let applied = match op.action {
            SyncAction::SaveDraft => self.save_draft(actor, &op).await,
            SyncAction::Delete => self.delete(actor, &op).await,
        };
        let (outcome, post_id, message) = match applied {
            Ok(applied) => applied,
            Err(e) => {
                if let Err(release) = self.repo.release(&client_id).await {
                    tracing::warn!("Failed to release sync operation {}: {}", client_id, release);
                }
                return Err(e);
            }
        };

        let result = SyncResult {
            client_id,
            action: op.action,
            outcome,
            post_id,
            message,
            duplicate: false,
        };
        self.repo
            .finish(&result)
            .await
            .context("Failed to record sync operation")?;
        Ok(result)
    }

    /// Result for a client id claimed elsewhere, waiting while it is in flight
    async fn wait_for_result(
        &self,
        client_id: String,
        op: SyncOperation,
    ) -> Result<SyncResult, SyncError> {
        for _ in 0..CLAIM_WAIT_ROUNDS {
            if let Some(mut previous) = self
                .repo
                .get(&client_id)
                .await
                .context("Failed to look up sync operation")?
            {
                previous.duplicate = true;
                return Ok(previous);
            }
            tokio::time::sleep(CLAIM_WAIT_STEP).await;
        }

        Ok(SyncResult {
            client_id,
            action: op.action,
            outcome: SyncOutcome::Rejected,
            post_id: op.post_id,
            message: Some("Operation is still being applied, retry later".to_string()),
            duplicate: true,
        })
    }

    async fn save_draft(
        &self,
        actor: &User,
        op: &SyncOperation,
    ) -> Result<(SyncOutcome, Option<i64>, Option<String>), SyncError> {
        let Some(post_id) = op.post_id else {
            let input = CreatePostInput {
                title: op.title.clone().unwrap_or_default(),
                content: op.content.clone().unwrap_or_default(),
                excerpt: op.excerpt.clone(),
                status: Some(PostStatus::Draft),
                ..Default::default()
            };
            return match self.posts.create(actor.id, input).await {
                Ok(post) => Ok((SyncOutcome::Applied, Some(post.id), None)),
                Err(e) => rejected(None, e),
            };
        };

        if let Some(conflict) = self.check_conflict(post_id, op).await? {
            return Ok(conflict);
        }

        let input = UpdatePostInput {
            title: op.title.clone(),
            content: op.content.clone(),
            excerpt: op.excerpt.clone(),
            ..Default::default()
        };
        match self.posts.update(actor, post_id, input).await {
            Ok(post) => Ok((SyncOutcome::Applied, Some(post.id), None)),
            Err(e) => rejected(Some(post_id), e),
        }
    }

    async fn delete(
        &self,
        actor: &User,
        op: &SyncOperation,
    ) -> Result<(SyncOutcome, Option<i64>, Option<String>), SyncError> {
        let Some(post_id) = op.post_id else {
            return Ok((
                SyncOutcome::Rejected,
                None,
                Some("post_id is required for delete".to_string()),
            ));
        };

        if let Some(conflict) = self.check_conflict(post_id, op).await? {
            return Ok(conflict);
        }

        match self.posts.delete(actor, post_id).await {
            Ok(()) => Ok((SyncOutcome::Applied, Some(post_id), None)),
            Err(e) => rejected(Some(post_id), e),
        }
    }

    /// `Some` when the post is missing or was changed after the client's edit
    async fn check_conflict(
        &self,
        post_id: i64,
        op: &SyncOperation,
    ) -> Result<Option<(SyncOutcome, Option<i64>, Option<String>)>, SyncError> {
        let post = match self.posts.get_by_id(post_id).await {
            Ok(post) => post,
            Err(PostServiceError::InternalError(e)) => return Err(e.into()),
            Err(e) => return Ok(Some((SyncOutcome::Rejected, Some(post_id), Some(e.to_string())))),
        };

        Ok(match post {
            None => Some((
                SyncOutcome::Rejected,
                Some(post_id),
                Some(format!("Post {} not found", post_id)),
            )),
            Some(post) if post.updated_at > op.client_updated_at => Some((
                SyncOutcome::Conflict,
                Some(post_id),
                Some(format!(
                    "Post was updated on the server at {}",
                    post.updated_at.to_rfc3339()
                )),
            )),
            Some(_) => None,
        })
    }
}

/// Map a post error to a rejected outcome; storage failures still abort
fn rejected(
    post_id: Option<i64>,
    error: PostServiceError,
) -> Result<(SyncOutcome, Option<i64>, Option<String>), SyncError> {
    match error {
        PostServiceError::InternalError(e) => Err(e.into()),
        other => Ok((SyncOutcome::Rejected, post_id, Some(other.to_string()))),
    }
}
