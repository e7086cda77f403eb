//! RSS feed management endpoints (editors)
//!
//! - GET/POST          /api/admin/rss/feeds
//! - GET/PUT/DELETE    /api/admin/rss/feeds/{id}
//! - POST              /api/admin/rss/feeds/{id}/refresh
//! - POST              /api/admin/rss/refresh
//! - GET               /api/admin/rss/items?feed_id=&imported=
//! - POST              /api/admin/rss/items/{id}/import

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{
    CreateFeedInput, FeedRefreshReport, ItemFilter, ListParams, PagedResult, Post, RssFeed,
    RssItem, UpdateFeedInput,
};

#[derive(Debug, Deserialize)]
pub struct ItemListQuery {
    #[serde(default)]
    pub feed_id: Option<i64>,
    #[serde(default)]
    pub imported: Option<bool>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub feed_id: i64,
    pub new_items: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/feeds", get(list_feeds).post(create_feed))
        .route(
            "/feeds/{id}",
            get(get_feed).put(update_feed).delete(delete_feed),
        )
        .route("/feeds/{id}/refresh", post(refresh_feed))
        .route("/refresh", post(refresh_all))
        .route("/items", get(list_items))
        .route("/items/{id}/import", post(import_item))
}

async fn list_feeds(State(state): State<AppState>) -> Result<Json<Vec<RssFeed>>, ApiError> {
    Ok(Json(state.rss_service.list_feeds().await?))
}

async fn create_feed(
    State(state): State<AppState>,
    Json(body): Json<CreateFeedInput>,
) -> Result<(StatusCode, Json<RssFeed>), ApiError> {
    let feed = state.rss_service.create_feed(body).await?;
    Ok((StatusCode::CREATED, Json(feed)))
}

async fn get_feed(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RssFeed>, ApiError> {
    Ok(Json(state.rss_service.get_feed(id).await?))
}

async fn update_feed(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateFeedInput>,
) -> Result<Json<RssFeed>, ApiError> {
    Ok(Json(state.rss_service.update_feed(id, body).await?))
}

async fn delete_feed(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.rss_service.delete_feed(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/admin/rss/feeds/{id}/refresh - 502 when the feed cannot be fetched
async fn refresh_feed(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let new_items = state.rss_service.refresh_feed(id).await?;
    Ok(Json(RefreshResponse {
        feed_id: id,
        new_items,
    }))
}

/// POST /api/admin/rss/refresh - per-feed report, failures included
async fn refresh_all(
    State(state): State<AppState>,
) -> Result<Json<Vec<FeedRefreshReport>>, ApiError> {
    Ok(Json(state.rss_service.refresh_all().await?))
}

async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ItemListQuery>,
) -> Result<Json<PagedResult<RssItem>>, ApiError> {
    let filter = ItemFilter {
        feed_id: query.feed_id,
        imported: query.imported,
    };
    let params = ListParams::new(query.page, query.per_page);
    Ok(Json(state.rss_service.list_items(&filter, &params).await?))
}

/// POST /api/admin/rss/items/{id}/import - draft post; 409 when already imported
async fn import_item(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    let post = state.rss_service.import_item(id, &user).await?;
    Ok((StatusCode::CREATED, Json(post)))
}
