//! Authentication API endpoints
//!
//! - GET  /api/auth/status - Whether first-run setup is still pending
//! - POST /api/auth/setup  - Create the first (admin) profile
//! - POST /api/auth/login  - Open a session
//! - POST /api/auth/logout - Close the current session
//! - GET  /api/auth/me     - Current profile

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::common::SuccessResponse;
use crate::api::middleware::{
    extract_session_token, ApiError, AppState, AuthenticatedUser, ClientIp,
};
use crate::models::{Session, User};
use crate::services::{LoginInput, SetupInput, UserServiceError};

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub needs_setup: bool,
}

/// Routes that work without a session
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/setup", post(setup))
        .route("/login", post(login))
}

/// Routes that need a session
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(me))
}

/// GET /api/auth/status
async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let needs_setup = state.user_service.needs_setup().await?;
    Ok(Json(StatusResponse { needs_setup }))
}

/// POST /api/auth/setup - only while no profile exists; logs the new admin in
async fn setup(
    State(state): State<AppState>,
    Json(body): Json<SetupInput>,
) -> Result<impl IntoResponse, ApiError> {
    let password = body.password.clone();
    let user = state.user_service.setup(body).await?;

    let (session, user) = state
        .user_service
        .login(LoginInput {
            email: user.email,
            password,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        session_headers(&session, state.session_days)?,
        Json(AuthResponse {
            user,
            token: session.id.clone(),
            expires_at: session.expires_at,
        }),
    ))
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginInput>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(ip) = ip {
        if state.rate_limiter.check_ip(ip).await {
            tracing::warn!("Login rate limit hit for {}", ip);
            return Err(ApiError::rate_limited(
                "Too many login requests, try again in a minute",
                60,
            ));
        }
    }

    let email = body.email.trim().to_lowercase();
    if state.rate_limiter.is_email_limited(&email).await {
        return Err(ApiError::rate_limited(
            "Too many failed attempts, try again in 15 minutes",
            900,
        ));
    }

    let (session, user) = match state.user_service.login(body).await {
        Ok(pair) => pair,
        Err(e) => {
            if matches!(e, UserServiceError::AuthenticationError(_)) {
                state.rate_limiter.record_failed_attempt(&email).await;
                tracing::info!("Failed login for {}", email);
            }
            return Err(e.into());
        }
    };
    state.rate_limiter.clear_email(&email).await;
    tracing::info!("Login: {}", user.email);

    Ok((
        session_headers(&session, state.session_days)?,
        Json(AuthResponse {
            user,
            token: session.id.clone(),
            expires_at: session.expires_at,
        }),
    ))
}

/// POST /api/auth/logout
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = extract_session_token(&headers) {
        state.user_service.logout(&token).await?;
    }

    let mut out = HeaderMap::new();
    out.insert(
        header::SET_COOKIE,
        HeaderValue::from_static("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    );
    Ok((out, Json(SuccessResponse::ok())))
}

/// GET /api/auth/me
async fn me(AuthenticatedUser(user): AuthenticatedUser) -> Json<User> {
    Json(user)
}

fn session_headers(session: &Session, days: i64) -> Result<HeaderMap, ApiError> {
    let cookie = format!(
        "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        session.id,
        days * 24 * 60 * 60
    );
    let value = HeaderValue::from_str(&cookie)
        .map_err(|_| ApiError::internal_error("Invalid session cookie"))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, value);
    Ok(headers)
}
