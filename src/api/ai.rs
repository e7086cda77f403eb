//! AI helper endpoints
//!
//! `fix` and `seo` run locally; `generate` calls the configured completion
//! provider and answers 503 when there is none.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};
use crate::services::ai::{FixInput, FixResult, GenerateRequest, GenerationKind, SeoInput, SeoReport};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub configured: bool,
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub kind: GenerationKind,
    #[serde(flatten)]
    pub request: GenerateRequest,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub kind: GenerationKind,
    pub text: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/fix", post(fix))
        .route("/seo", post(seo))
        .route("/generate", post(generate))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        configured: state.ai_service.is_configured(),
    })
}

async fn fix(State(state): State<AppState>, Json(body): Json<FixInput>) -> Json<FixResult> {
    Json(state.ai_service.fix(&body))
}

async fn seo(State(state): State<AppState>, Json(body): Json<SeoInput>) -> Json<SeoReport> {
    Json(state.ai_service.seo_score(&body))
}

async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<GenerateResponse>, ApiError> {
    tracing::debug!("AI generation requested: {:?}", body.kind);
    let text = state.ai_service.generate(body.kind, &body.request).await?;
    Ok(Json(GenerateResponse {
        kind: body.kind,
        text,
    }))
}
