//! Admin API endpoints
//!
//! - GET /api/admin/dashboard      - Content and request statistics
//! - GET/PUT /api/admin/settings   - Site settings (admin only)
//! - /api/admin/users              - Profile management (admin only)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{CreateUserInput, PostStatusCounts, UpdateUserInput, User};
use crate::services::settings::{SiteSettings, UpdateSettingsInput};

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub posts: PostStatusCounts,
    pub total_posts: i64,
    pub active_subscribers: i64,
    pub active_feeds: usize,
    pub pending_social_posts: i64,
    pub requests: RequestStatsResponse,
}

#[derive(Debug, Serialize)]
pub struct RequestStatsResponse {
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
    pub uptime_seconds: u64,
}

/// Routes open to editors
pub fn dashboard_router() -> Router<AppState> {
    Router::new().route("/dashboard", get(get_dashboard))
}

/// Routes restricted to admins
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/settings", get(get_settings).put(update_settings))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", put(update_user))
}

/// GET /api/admin/dashboard
async fn get_dashboard(State(state): State<AppState>) -> Result<Json<DashboardResponse>, ApiError> {
    let posts = state.post_service.status_counts().await?;
    let active_subscribers = state.newsletter_service.active_count().await?;
    let active_feeds = state.rss_service.active_feed_count().await?;
    let pending_social_posts = state.social_service.pending_count().await?;
    let stats = &state.request_stats;

    Ok(Json(DashboardResponse {
        total_posts: posts.total(),
        posts,
        active_subscribers,
        active_feeds,
        pending_social_posts,
        requests: RequestStatsResponse {
            total_requests: stats.total_requests(),
            avg_response_time_ms: stats.avg_response_time_ms(),
            uptime_seconds: stats.uptime_seconds(),
        },
    }))
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<SiteSettings>, ApiError> {
    Ok(Json(state.settings_service.get_site_settings().await?))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(body): Json<UpdateSettingsInput>,
) -> Result<Json<SiteSettings>, ApiError> {
    let settings = state.settings_service.update_site_settings(body).await?;
    tracing::info!("Site settings updated");
    Ok(Json(settings))
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.user_service.list().await?))
}

async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserInput>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.user_service.create(body).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateUserInput>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.user_service.update(&actor, id, body).await?))
}
