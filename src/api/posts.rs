//! Post API endpoints
//!
//! Public (published posts only):
//! - GET /api/posts         - List, filtered by `category` / `tag` slug
//! - GET /api/posts/{slug}  - Detail
//!
//! Admin panel:
//! - GET    /api/admin/posts       - List with status/category/search filters
//! - POST   /api/admin/posts       - Create
//! - GET    /api/admin/posts/{id}  - Detail, any status
//! - PUT    /api/admin/posts/{id}  - Update
//! - DELETE /api/admin/posts/{id}  - Delete

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{CreatePostInput, PagedResult, Post, UpdatePostInput};
use crate::services::post::{AdminPostQuery, PublicPostQuery};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_published))
        .route("/{slug}", get(get_published))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_admin).post(create_post))
        .route(
            "/{id}",
            get(get_post).put(update_post).delete(delete_post),
        )
}

/// GET /api/posts
async fn list_published(
    State(state): State<AppState>,
    Query(mut query): Query<PublicPostQuery>,
) -> Result<Json<PagedResult<Post>>, ApiError> {
    if query.per_page.is_none() {
        query.per_page = state
            .settings_service
            .get_site_settings()
            .await
            .ok()
            .map(|s| s.posts_per_page);
    }
    Ok(Json(state.post_service.list_published(&query).await?))
}

/// GET /api/posts/{slug}
async fn get_published(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Post>, ApiError> {
    let post = state
        .post_service
        .get_published(&slug)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Post not found: {}", slug)))?;
    Ok(Json(post))
}

/// GET /api/admin/posts
async fn list_admin(
    State(state): State<AppState>,
    Query(query): Query<AdminPostQuery>,
) -> Result<Json<PagedResult<Post>>, ApiError> {
    Ok(Json(state.post_service.list_admin(&query).await?))
}

/// POST /api/admin/posts
async fn create_post(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<CreatePostInput>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    tracing::debug!("Create post payload: {:?}", body);
    let post = state.post_service.create(user.id, body).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// GET /api/admin/posts/{id}
async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Post>, ApiError> {
    let post = state
        .post_service
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Post not found: {}", id)))?;
    Ok(Json(post))
}

/// PUT /api/admin/posts/{id}
async fn update_post(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdatePostInput>,
) -> Result<Json<Post>, ApiError> {
    tracing::debug!("Update post {} payload: {:?}", id, body);
    Ok(Json(state.post_service.update(&user, id, body).await?))
}

/// DELETE /api/admin/posts/{id}
async fn delete_post(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.post_service.delete(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
