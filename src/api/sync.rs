//! Offline draft sync
//!
//! POST /api/admin/sync takes the operations the admin front end queued while
//! offline and answers with one result per operation, in order.

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{SyncBatch, SyncResult};

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub results: Vec<SyncResult>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(sync))
}

async fn sync(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(batch): Json<SyncBatch>,
) -> Result<Json<SyncResponse>, ApiError> {
    tracing::debug!(
        "Sync batch of {} operation(s) from {}",
        batch.operations.len(),
        user.email
    );
    let results = state.sync_service.apply_batch(&user, batch).await?;
    Ok(Json(SyncResponse { results }))
}
