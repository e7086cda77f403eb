//! Category API endpoints
//!
//! - GET    /api/categories              - All categories with post counts
//! - GET    /api/categories/{slug}       - One category
//! - POST   /api/admin/categories        - Create
//! - PUT    /api/admin/categories/{id}   - Update
//! - DELETE /api/admin/categories/{id}   - Delete (400 while posts are attached)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{Category, CategoryWithCount, CreateCategoryInput, UpdateCategoryInput};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_categories))
        .route("/{slug}", get(get_category))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_category))
        .route("/{id}", put(update_category).delete(delete_category))
}

async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<CategoryWithCount>>, ApiError> {
    Ok(Json(state.category_service.list().await?))
}

async fn get_category(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Category>, ApiError> {
    let category = state
        .category_service
        .get_by_slug(&slug)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Category not found: {}", slug)))?;
    Ok(Json(category))
}

async fn create_category(
    State(state): State<AppState>,
    Json(body): Json<CreateCategoryInput>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let category = state.category_service.create(body).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateCategoryInput>,
) -> Result<Json<Category>, ApiError> {
    Ok(Json(state.category_service.update(id, body).await?))
}

async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.category_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
