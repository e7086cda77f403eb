//! Public XML documents: `/rss.xml` and `/sitemap.xml`

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::api::middleware::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rss.xml", get(rss))
        .route("/sitemap.xml", get(sitemap))
}

async fn rss(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let xml = state.feed_service.rss().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/rss+xml; charset=utf-8"),
            (header::CACHE_CONTROL, "public, max-age=300"),
        ],
        xml,
    ))
}

async fn sitemap(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let xml = state.feed_service.sitemap().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/xml; charset=utf-8"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        xml,
    ))
}
