//! Public site information API
//!
//! Used by the front end to display the site name and contact details.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::api::middleware::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct SiteInfoResponse {
    pub version: String,
    pub site_name: String,
    pub site_description: String,
    pub contact_email: String,
    pub posts_per_page: u32,
    pub newsletter_enabled: bool,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/info", get(get_site_info))
}

/// GET /api/site/info
async fn get_site_info(State(state): State<AppState>) -> Result<Json<SiteInfoResponse>, ApiError> {
    let settings = state.settings_service.get_site_settings().await?;

    Ok(Json(SiteInfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        site_name: settings.site_name,
        site_description: settings.site_description,
        contact_email: settings.contact_email,
        posts_per_page: settings.posts_per_page,
        newsletter_enabled: state.newsletter_service.is_configured(),
    }))
}
