//! Tag API endpoints
//!
//! - GET    /api/tags             - All tags with usage counts
//! - POST   /api/admin/tags       - Create, or return the existing tag of that name
//! - DELETE /api/admin/tags/{id}  - Delete

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState};
use crate::models::{Tag, TagWithCount};

#[derive(Debug, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/", get(list_tags))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_tag))
        .route("/{id}", delete(delete_tag))
}

async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<TagWithCount>>, ApiError> {
    Ok(Json(state.tag_service.list().await?))
}

async fn create_tag(
    State(state): State<AppState>,
    Json(body): Json<CreateTagRequest>,
) -> Result<Json<Tag>, ApiError> {
    Ok(Json(state.tag_service.create_or_get(&body.name).await?))
}

async fn delete_tag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.tag_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
