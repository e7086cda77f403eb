//! API layer - HTTP handlers and routing
//!
//! - `/api/...`: public JSON endpoints (posts, categories, tags, site info,
//!   newsletter signup, auth)
//! - `/api/admin/...`: the admin panel, behind a session and a role check
//! - `/api/ai/...`: writing helpers for signed-in profiles
//! - `/rss.xml`, `/sitemap.xml` and `/uploads/...`

pub mod admin;
pub mod ai;
pub mod auth;
pub mod campaigns;
pub mod categories;
pub mod common;
pub mod feeds;
pub mod middleware;
pub mod newsletter;
pub mod posts;
pub mod rss;
pub mod site;
pub mod social;
pub mod sync;
pub mod tags;
pub mod upload;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, services::ServeDir,
    set_header::SetResponseHeader, trace::TraceLayer,
};

/// Uploaded files are never run as documents in the site's origin
const UPLOADS_CSP: &str = "default-src 'none'; style-src 'unsafe-inline'; sandbox";

pub use middleware::{ApiError, AppState, AuthenticatedUser, RequestStats};

/// Build the `/api` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Profiles and settings: admins only
    let admin_only = Router::new()
        .merge(admin::router())
        .merge(newsletter::admin_router())
        .route_layer(axum_middleware::from_fn(middleware::require_admin));

    // Shared content and marketing: editors and admins
    let editor_only = Router::new()
        .merge(admin::dashboard_router())
        .nest("/categories", categories::admin_router())
        .nest("/tags", tags::admin_router())
        .nest("/rss", rss::router())
        .nest("/campaigns", campaigns::router())
        .nest("/social", social::router())
        .route_layer(axum_middleware::from_fn(middleware::require_editor));

    // Any signed-in profile; post ownership is checked by the service
    let admin_panel = Router::new()
        .nest("/posts", posts::admin_router())
        .nest("/media", upload::router(state.upload_config.max_file_size))
        .nest("/sync", sync::router())
        .merge(admin_only)
        .merge(editor_only)
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/ai", ai::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .nest("/posts", posts::public_router())
        .nest("/categories", categories::public_router())
        .nest("/tags", tags::public_router())
        .nest("/site", site::router())
        .nest("/newsletter", newsletter::public_router())
        .nest("/auth", auth::public_router())
        .nest("/admin", admin_panel)
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    // Cookie auth needs an explicit origin
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .allow_credentials(true);
    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(_) => tracing::warn!("Invalid CORS origin {:?}, cross-origin requests disabled", cors_origin),
    }

    Router::new()
        .nest("/api", build_api_router(state.clone()))
        .merge(feeds::router())
        .nest_service("/uploads", uploads_service(&state.upload_config.path))
        .fallback(not_found)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        // Outermost, so every request is counted
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state)
}

fn uploads_service(
    path: &std::path::Path,
) -> SetResponseHeader<SetResponseHeader<ServeDir, HeaderValue>, HeaderValue> {
    SetResponseHeader::overriding(
        SetResponseHeader::overriding(
            ServeDir::new(path),
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(UPLOADS_CSP),
        ),
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    )
}

async fn not_found() -> ApiError {
    ApiError::not_found("No such route")
}
