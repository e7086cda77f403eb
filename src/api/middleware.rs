//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The JSON error type and the service error conversions
//! - Authentication (session token validation) and role checks
//! - Request statistics

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::create_cache;
use crate::config::{Config, UploadConfig};
use crate::db::repositories::{
    SqlxCampaignRepository, SqlxCategoryRepository, SqlxPostRepository, SqlxRssRepository,
    SqlxSessionRepository, SqlxSettingsRepository, SqlxSocialPostRepository,
    SqlxSubscriberRepository, SqlxSyncRepository, SqlxTagRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::User;
use crate::services::ai::{CompletionProvider, OpenAiCompatibleProvider};
use crate::services::{
    AiError, AiService, CampaignError, CampaignService, CategoryService, CategoryServiceError,
    EmailSender, FeedService, LoginRateLimiter, NewsletterError, NewsletterService, PostService,
    PostServiceError, RssError, RssService, SettingsService, SettingsServiceError,
    SmtpEmailSender, SocialError, SocialService, SyncError, SyncService, TagService,
    TagServiceError, UserService, UserServiceError,
};

// ============================================================================
// Request Statistics
// ============================================================================

/// Lightweight request statistics using atomic operations (no locks)
pub struct RequestStats {
    total_requests: AtomicU64,
    /// Total response time in microseconds (for calculating average)
    total_response_time_us: AtomicU64,
    start_time: Instant,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, duration_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Average response time in milliseconds
    pub fn avg_response_time_ms(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let total_time = self.total_response_time_us.load(Ordering::Relaxed);
        total_time as f64 / total as f64 / 1000.0
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub category_service: Arc<CategoryService>,
    pub tag_service: Arc<TagService>,
    pub post_service: Arc<PostService>,
    pub settings_service: Arc<SettingsService>,
    pub newsletter_service: Arc<NewsletterService>,
    pub rss_service: Arc<RssService>,
    pub ai_service: Arc<AiService>,
    pub campaign_service: Arc<CampaignService>,
    pub social_service: Arc<SocialService>,
    pub sync_service: Arc<SyncService>,
    pub feed_service: Arc<FeedService>,
    pub rate_limiter: Arc<LoginRateLimiter>,
    pub request_stats: Arc<RequestStats>,
    pub upload_config: Arc<UploadConfig>,
    /// Peers allowed to report the client address in proxy headers
    pub trusted_proxies: Arc<Vec<IpAddr>>,
    /// Lifetime of the session cookie
    pub session_days: i64,
}

impl AppState {
    /// Wire repositories and services for `pool`. Email and AI are only
    /// enabled when their config sections are complete.
    pub fn from_config(pool: DynDatabasePool, config: &Config) -> anyhow::Result<Self> {
        let cache = create_cache(&config.cache);

        let category_repo = SqlxCategoryRepository::boxed(pool.clone());
        let user_service = Arc::new(UserService::with_session_days(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
            config.security.session_days,
        ));
        let category_service = Arc::new(CategoryService::new(category_repo.clone(), cache.clone()));
        let tag_service = Arc::new(TagService::new(SqlxTagRepository::boxed(pool.clone())));
        let post_service = Arc::new(PostService::new(
            SqlxPostRepository::boxed(pool.clone()),
            category_repo.clone(),
            tag_service.clone(),
            cache.clone(),
        ));
        let settings_service = Arc::new(SettingsService::new(SqlxSettingsRepository::boxed(
            pool.clone(),
        )));

        let sender: Option<Arc<dyn EmailSender>> = if config.email.is_configured() {
            match SmtpEmailSender::from_config(&config.email) {
                Ok(sender) => Some(Arc::new(sender)),
                Err(e) => {
                    tracing::warn!("Email delivery disabled: {:#}", e);
                    None
                }
            }
        } else {
            tracing::info!("No SMTP host configured, newsletter sending disabled");
            None
        };
        let newsletter_service = Arc::new(NewsletterService::new(
            SqlxSubscriberRepository::boxed(pool.clone()),
            sender,
            config.security.secret.clone(),
            config.site.absolute_url("/api/newsletter/unsubscribe"),
        ));

        let rss_service = Arc::new(RssService::new(
            SqlxRssRepository::boxed(pool.clone()),
            category_repo.clone(),
            post_service.clone(),
            config.rss.clone(),
        )?);

        let provider: Option<Arc<dyn CompletionProvider>> = if config.ai.is_configured() {
            match OpenAiCompatibleProvider::from_config(&config.ai) {
                Ok(provider) => Some(Arc::new(provider)),
                Err(e) => {
                    tracing::warn!("AI generation disabled: {:#}", e);
                    None
                }
            }
        } else {
            tracing::info!("No AI API key configured, generation disabled");
            None
        };
        let ai_service = Arc::new(AiService::new(provider));

        let social_service = Arc::new(SocialService::new(SqlxSocialPostRepository::boxed(
            pool.clone(),
        )));
        let campaign_service = Arc::new(CampaignService::new(
            SqlxCampaignRepository::boxed(pool.clone()),
            post_service.clone(),
            ai_service.clone(),
            social_service.clone(),
            newsletter_service.clone(),
            config.site.clone(),
        ));
        let sync_service = Arc::new(SyncService::new(
            SqlxSyncRepository::boxed(pool),
            post_service.clone(),
        ));
        let feed_service = Arc::new(FeedService::new(
            post_service.clone(),
            category_repo,
            cache,
            config.site.clone(),
        ));

        Ok(Self {
            user_service,
            category_service,
            tag_service,
            post_service,
            settings_service,
            newsletter_service,
            rss_service,
            ai_service,
            campaign_service,
            social_service,
            sync_service,
            feed_service,
            rate_limiter: Arc::new(LoginRateLimiter::new()),
            request_stats: Arc::new(RequestStats::new()),
            upload_config: Arc::new(config.upload.clone()),
            trusted_proxies: Arc::new(config.server.trusted_proxies.clone()),
            session_days: config.security.session_days,
        })
    }
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Client address for rate limiting. Proxy headers only count when the
/// socket peer is a configured trusted proxy.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(ClientIp(resolve_client_ip(
            peer,
            &parts.headers,
            &state.trusted_proxies,
        )))
    }
}

fn resolve_client_ip(
    peer: Option<IpAddr>,
    headers: &HeaderMap,
    trusted: &[IpAddr],
) -> Option<IpAddr> {
    match peer {
        Some(peer) if trusted.contains(&peer) => {
            ip_from_headers(headers, trusted).or(Some(peer))
        }
        other => other,
    }
}

/// Walk `X-Forwarded-For` from the right, skipping our own proxies; the
/// first hop we don't run is the client. Falls back to `X-Real-IP`.
fn ip_from_headers(headers: &HeaderMap, trusted: &[IpAddr]) -> Option<IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        let hops: Vec<IpAddr> = forwarded
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        if let Some(ip) = hops
            .iter()
            .rev()
            .find(|ip| !trusted.contains(ip))
            .or_else(|| hops.first())
        {
            return Some(*ip);
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

// ============================================================================
// Errors
// ============================================================================

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::with_details(
            "RATE_LIMIT",
            message,
            serde_json::json!({ "retry_after": retry_after_secs }),
        )
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new("SERVICE_UNAVAILABLE", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new("BAD_GATEWAY", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMIT" => StatusCode::TOO_MANY_REQUESTS,
            "SERVICE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            "BAD_GATEWAY" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:#}", err);
        Self::internal_error("Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::AuthenticationError(msg) => Self::unauthorized(msg),
            UserServiceError::ValidationError(msg) => Self::validation_error(msg),
            UserServiceError::UserExists(_) | UserServiceError::SetupComplete => {
                Self::conflict(err.to_string())
            }
            UserServiceError::NotFound(_) => Self::not_found(err.to_string()),
            UserServiceError::SelfLockout(_) => Self::forbidden(err.to_string()),
            UserServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<CategoryServiceError> for ApiError {
    fn from(err: CategoryServiceError) -> Self {
        match err {
            CategoryServiceError::DuplicateName(_) | CategoryServiceError::DuplicateSlug(_) => {
                Self::conflict(err.to_string())
            }
            CategoryServiceError::NotFound(_) => Self::not_found(err.to_string()),
            CategoryServiceError::HasPosts(_) => Self::validation_error(err.to_string()),
            CategoryServiceError::ValidationError(msg) => Self::validation_error(msg),
            CategoryServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<TagServiceError> for ApiError {
    fn from(err: TagServiceError) -> Self {
        match err {
            TagServiceError::NotFound(_) => Self::not_found(err.to_string()),
            TagServiceError::ValidationError(msg) => Self::validation_error(msg),
            TagServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<PostServiceError> for ApiError {
    fn from(err: PostServiceError) -> Self {
        match err {
            PostServiceError::NotFound(_) => Self::not_found(err.to_string()),
            PostServiceError::DuplicateSlug(_) => Self::conflict(err.to_string()),
            PostServiceError::ValidationError(msg) => Self::validation_error(msg),
            PostServiceError::Forbidden(msg) => Self::forbidden(msg),
            PostServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<SettingsServiceError> for ApiError {
    fn from(err: SettingsServiceError) -> Self {
        match err {
            SettingsServiceError::InvalidValue(msg) => Self::validation_error(msg),
            other => {
                tracing::error!("Settings error: {}", other);
                Self::internal_error("Internal server error")
            }
        }
    }
}

impl From<NewsletterError> for ApiError {
    fn from(err: NewsletterError) -> Self {
        match err {
            NewsletterError::ValidationError(msg) => Self::validation_error(msg),
            NewsletterError::InvalidToken => Self::validation_error(err.to_string()),
            NewsletterError::NotFound(_) => Self::not_found(err.to_string()),
            NewsletterError::NotConfigured => Self::service_unavailable(err.to_string()),
            NewsletterError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<RssError> for ApiError {
    fn from(err: RssError) -> Self {
        match err {
            RssError::NotFound(_) => Self::not_found(err.to_string()),
            RssError::ValidationError(msg) => Self::validation_error(msg),
            RssError::DuplicateUrl(_) | RssError::AlreadyImported(_) => {
                Self::conflict(err.to_string())
            }
            RssError::Fetch(_) => Self::bad_gateway(err.to_string()),
            RssError::Post(e) => e.into(),
            RssError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<AiError> for ApiError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::NotConfigured => Self::service_unavailable(err.to_string()),
            AiError::ValidationError(msg) => Self::validation_error(msg),
            AiError::Provider(_) => Self::bad_gateway(err.to_string()),
            AiError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<SocialError> for ApiError {
    fn from(err: SocialError) -> Self {
        match err {
            SocialError::NotFound(_) => Self::not_found(err.to_string()),
            SocialError::ValidationError(msg) => Self::validation_error(msg),
            SocialError::NotPending(_) => Self::conflict(err.to_string()),
            SocialError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<CampaignError> for ApiError {
    fn from(err: CampaignError) -> Self {
        match err {
            CampaignError::NotFound(_) => Self::not_found(err.to_string()),
            CampaignError::ValidationError(msg) => Self::validation_error(msg),
            CampaignError::InvalidTransition { .. } => Self::conflict(err.to_string()),
            CampaignError::Ai(e) => e.into(),
            CampaignError::Newsletter(e) => e.into(),
            CampaignError::Social(e) => e.into(),
            CampaignError::Post(e) => e.into(),
            CampaignError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::ValidationError(msg) => Self::validation_error(msg),
            SyncError::InternalError(e) => Self::internal(e),
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Session token from `Authorization: Bearer` or the `session` cookie
pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                let cookie = cookie.trim();
                if let Some(token) = cookie.strip_prefix("session=") {
                    return Some(token.to_string());
                }
            }
        }
    }

    None
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let user = state
        .user_service
        .validate_session(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    request.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(request).await)
}

/// Admin authorization middleware
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.0.is_admin() {
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

/// Editor authorization middleware (admins pass too)
pub async fn require_editor(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.0.is_editor() {
        return Err(ApiError::forbidden("Editor privileges required"));
    }

    Ok(next.run(request).await)
}

/// Records request count and response time
pub async fn request_stats_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    state
        .request_stats
        .record(start.elapsed().as_micros() as u64);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(name, HeaderValue::from_str(value).unwrap());
        map
    }

    #[test]
    fn test_extract_session_token_from_bearer() {
        let map = headers(header::AUTHORIZATION, "Bearer abc123");
        assert_eq!(extract_session_token(&map), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_session_token_from_cookie() {
        let map = headers(header::COOKIE, "theme=dark; session=xyz789");
        assert_eq!(extract_session_token(&map), Some("xyz789".to_string()));
    }

    #[test]
    fn test_extract_session_token_bearer_priority() {
        let mut map = headers(header::AUTHORIZATION, "Bearer bearer_token");
        map.insert(
            header::COOKIE,
            HeaderValue::from_static("session=cookie_token"),
        );
        assert_eq!(extract_session_token(&map), Some("bearer_token".to_string()));
    }

    #[test]
    fn test_extract_session_token_none() {
        assert_eq!(extract_session_token(&HeaderMap::new()), None);
        let map = headers(header::AUTHORIZATION, "Basic dXNlcjpwYXNz");
        assert_eq!(extract_session_token(&map), None);
    }

    #[test]
    fn test_ip_from_headers() {
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        let map = headers(
            header::HeaderName::from_static("x-forwarded-for"),
            "198.51.100.9, 203.0.113.7, 10.0.0.1",
        );
        // Rightmost hop that isn't ours
        assert_eq!(ip_from_headers(&map, &[proxy]), "203.0.113.7".parse().ok());

        let map = headers(header::HeaderName::from_static("x-forwarded-for"), "10.0.0.1");
        assert_eq!(ip_from_headers(&map, &[proxy]), Some(proxy));

        let map = headers(header::HeaderName::from_static("x-real-ip"), "198.51.100.2");
        assert_eq!(ip_from_headers(&map, &[proxy]), "198.51.100.2".parse().ok());

        let map = headers(header::HeaderName::from_static("x-forwarded-for"), "garbage");
        assert_eq!(ip_from_headers(&map, &[proxy]), None);
    }

    #[test]
    fn test_untrusted_peer_cannot_spoof_client_ip() {
        let attacker: IpAddr = "192.0.2.50".parse().unwrap();
        let map = headers(header::HeaderName::from_static("x-forwarded-for"), "203.0.113.7");

        // No trusted proxies configured
        assert_eq!(resolve_client_ip(Some(attacker), &map, &[]), Some(attacker));

        // Peer is not in the trusted list
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(resolve_client_ip(Some(attacker), &map, &[proxy]), Some(attacker));

        let map = headers(header::HeaderName::from_static("x-real-ip"), "203.0.113.7");
        assert_eq!(resolve_client_ip(Some(attacker), &map, &[proxy]), Some(attacker));
    }

    #[test]
    fn test_trusted_proxy_forwards_client_ip() {
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        let map = headers(header::HeaderName::from_static("x-forwarded-for"), "203.0.113.7");
        assert_eq!(
            resolve_client_ip(Some(proxy), &map, &[proxy]),
            "203.0.113.7".parse().ok()
        );

        // No header from the proxy: the proxy itself is all we know
        assert_eq!(
            resolve_client_ip(Some(proxy), &HeaderMap::new(), &[proxy]),
            Some(proxy)
        );
        assert_eq!(resolve_client_ip(None, &map, &[proxy]), None);
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (ApiError::unauthorized("x"), StatusCode::UNAUTHORIZED),
            (ApiError::forbidden("x"), StatusCode::FORBIDDEN),
            (ApiError::not_found("x"), StatusCode::NOT_FOUND),
            (ApiError::validation_error("x"), StatusCode::BAD_REQUEST),
            (ApiError::conflict("x"), StatusCode::CONFLICT),
            (ApiError::rate_limited("x", 60), StatusCode::TOO_MANY_REQUESTS),
            (ApiError::service_unavailable("x"), StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::bad_gateway("x"), StatusCode::BAD_GATEWAY),
            (ApiError::internal_error("x"), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::new("SOMETHING_ELSE", "x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(error.status(), status, "{}", error.error.code);
        }
    }

    #[test]
    fn test_service_error_mapping() {
        let err: ApiError = CategoryServiceError::HasPosts(3).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = PostServiceError::DuplicateSlug("a".into()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err: ApiError = RssError::AlreadyImported(4).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err: ApiError = RssError::Post(PostServiceError::ValidationError("t".into())).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = CampaignError::Ai(AiError::NotConfigured).into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let err: ApiError = NewsletterError::InvalidToken.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = UserServiceError::InternalError(anyhow::anyhow!("db down")).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error.message, "Internal server error");
    }

    #[test]
    fn test_rate_limited_details() {
        let err = ApiError::rate_limited("slow down", 900);
        assert_eq!(err.error.code, "RATE_LIMIT");
        assert_eq!(err.error.details, Some(serde_json::json!({"retry_after": 900})));
    }

    #[test]
    fn test_request_stats() {
        let stats = RequestStats::new();
        assert_eq!(stats.avg_response_time_ms(), 0.0);
        stats.record(1000);
        stats.record(3000);
        assert_eq!(stats.total_requests(), 2);
        assert!((stats.avg_response_time_ms() - 2.0).abs() < f64::EPSILON);
    }
}

#[cfg(test)]
mod role_layer_tests {
    use super::*;
    use crate::models::UserRole;
    use axum::{body::Body, middleware::from_fn, routing::get, Router};
    use tower::ServiceExt;

    fn app(user: Option<UserRole>) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .route_layer(from_fn(require_editor))
            .layer(from_fn(move |mut request: Request, next: Next| async move {
                if let Some(role) = user {
                    let user = User::new("e@example.com".into(), "E".into(), "x".into(), role);
                    request.extensions_mut().insert(AuthenticatedUser(user));
                }
                next.run(request).await
            }))
    }

    async fn status_for(user: Option<UserRole>) -> StatusCode {
        app(user)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_require_editor() {
        assert_eq!(status_for(None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(Some(UserRole::Author)).await, StatusCode::FORBIDDEN);
        assert_eq!(status_for(Some(UserRole::Editor)).await, StatusCode::OK);
        assert_eq!(status_for(Some(UserRole::Admin)).await, StatusCode::OK);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::models::UserRole;
    use proptest::prelude::*;

    fn role_strategy() -> impl Strategy<Value = UserRole> {
        prop_oneof![
            Just(UserRole::Admin),
            Just(UserRole::Editor),
            Just(UserRole::Author),
        ]
    }

    fn user(id: i64, role: UserRole) -> User {
        let mut user = User::new(format!("u{}@example.com", id), "U".into(), "x".into(), role);
        user.id = id;
        user
    }

    proptest! {
        #[test]
        fn only_admins_pass_the_admin_check(role in role_strategy()) {
            prop_assert_eq!(user(1, role).is_admin(), role == UserRole::Admin);
        }

        #[test]
        fn authors_edit_only_their_own_posts(user_id in 1i64..100, author_id in 1i64..100, role in role_strategy()) {
            let u = user(user_id, role);
            let expected = role != UserRole::Author || user_id == author_id;
            prop_assert_eq!(u.can_edit(author_id), expected);
        }
    }
}
