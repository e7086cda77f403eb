//! Campaign endpoints (editors)
//!
//! - GET/POST     /api/admin/campaigns
//! - GET/DELETE   /api/admin/campaigns/{id}
//! - POST         /api/admin/campaigns/{id}/generate
//! - POST         /api/admin/campaigns/{id}/publish
//!
//! Illegal status transitions answer 409.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{Campaign, CreateCampaignInput, PublishCampaignInput};
use crate::services::campaign::PublishReport;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_campaigns).post(create_campaign))
        .route("/{id}", get(get_campaign).delete(delete_campaign))
        .route("/{id}/generate", post(generate_campaign))
        .route("/{id}/publish", post(publish_campaign))
}

async fn list_campaigns(State(state): State<AppState>) -> Result<Json<Vec<Campaign>>, ApiError> {
    Ok(Json(state.campaign_service.list().await?))
}

async fn create_campaign(
    State(state): State<AppState>,
    Json(body): Json<CreateCampaignInput>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let campaign = state.campaign_service.create(body).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.campaign_service.get(id).await?))
}

async fn delete_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.campaign_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/admin/campaigns/{id}/generate - 503 without an AI provider
async fn generate_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.campaign_service.generate(id).await?))
}

async fn publish_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<PublishCampaignInput>,
) -> Result<Json<PublishReport>, ApiError> {
    Ok(Json(state.campaign_service.publish(id, body).await?))
}
