//! Newsletter API endpoints
//!
//! Public:
//! - POST /api/newsletter/subscribe
//! - GET|POST /api/newsletter/unsubscribe?email=..&token=..
//!
//! Admin:
//! - GET    /api/admin/subscribers
//! - DELETE /api/admin/subscribers/{id}
//! - POST   /api/admin/newsletter/send

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{ApiError, AppState};
use crate::models::{
    ListParams, PagedResult, SendReport, SubscribeInput, Subscriber, SubscriberStatus,
};
use crate::services::newsletter::{SendNewsletterInput, SubscribeOutcome};

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub subscriber: Subscriber,
    /// `created`, `already_active` or `reactivated`
    pub outcome: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeQuery {
    pub email: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscriberListQuery {
    #[serde(default)]
    pub status: Option<SubscriberStatus>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", get(unsubscribe).post(unsubscribe))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/subscribers", get(list_subscribers))
        .route("/subscribers/{id}", delete(delete_subscriber))
        .route("/newsletter/send", post(send_newsletter))
}

/// POST /api/newsletter/subscribe - 201 for a new address, 200 otherwise
async fn subscribe(
    State(state): State<AppState>,
    Json(body): Json<SubscribeInput>,
) -> Result<(StatusCode, Json<SubscribeResponse>), ApiError> {
    let (subscriber, outcome) = state.newsletter_service.subscribe(body).await?;
    let (status, outcome) = match outcome {
        SubscribeOutcome::Created => (StatusCode::CREATED, "created"),
        SubscribeOutcome::AlreadyActive => (StatusCode::OK, "already_active"),
        SubscribeOutcome::Reactivated => (StatusCode::OK, "reactivated"),
    };
    Ok((status, Json(SubscribeResponse { subscriber, outcome })))
}

async fn unsubscribe(
    State(state): State<AppState>,
    Query(query): Query<UnsubscribeQuery>,
) -> Result<Json<Subscriber>, ApiError> {
    Ok(Json(
        state
            .newsletter_service
            .unsubscribe(&query.email, &query.token)
            .await?,
    ))
}

async fn list_subscribers(
    State(state): State<AppState>,
    Query(query): Query<SubscriberListQuery>,
) -> Result<Json<PagedResult<Subscriber>>, ApiError> {
    let params = ListParams::new(query.page, query.per_page);
    Ok(Json(
        state.newsletter_service.list(query.status, &params).await?,
    ))
}

async fn delete_subscriber(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.newsletter_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/admin/newsletter/send - 503 without an email provider
async fn send_newsletter(
    State(state): State<AppState>,
    Json(body): Json<SendNewsletterInput>,
) -> Result<Json<SendReport>, ApiError> {
    Ok(Json(state.newsletter_service.send(&body).await?))
}
