//! Scheduled social post endpoints (editors)
//!
//! - GET  /api/admin/social?status=
//! - POST /api/admin/social
//! - GET  /api/admin/social/{id}
//! - POST /api/admin/social/{id}/cancel  (pending posts only, else 409)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{ApiError, AppState};
use crate::models::{CreateSocialPostInput, ListParams, PagedResult, SocialPost, SocialStatus};

#[derive(Debug, Deserialize)]
pub struct SocialListQuery {
    #[serde(default)]
    pub status: Option<SocialStatus>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts).post(create_post))
        .route("/{id}", get(get_post))
        .route("/{id}/cancel", post(cancel_post))
}

async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<SocialListQuery>,
) -> Result<Json<PagedResult<SocialPost>>, ApiError> {
    let params = ListParams::new(query.page, query.per_page);
    Ok(Json(state.social_service.list(query.status, &params).await?))
}

async fn create_post(
    State(state): State<AppState>,
    Json(body): Json<CreateSocialPostInput>,
) -> Result<(StatusCode, Json<SocialPost>), ApiError> {
    let post = state.social_service.create(body).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SocialPost>, ApiError> {
    Ok(Json(state.social_service.get(id).await?))
}

async fn cancel_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SocialPost>, ApiError> {
    Ok(Json(state.social_service.cancel(id).await?))
}
