//! Media upload endpoint
//!
//! POST /api/admin/media accepts multipart/form-data with a single field
//! named "file". Files are stored under `upload.path` with a UUID name and
//! served from `/uploads/<name>`.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::path::Path;
use tokio::fs;
use uuid::Uuid;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};

/// Multipart framing on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub filename: String,
    pub size: u64,
    pub content_type: String,
}

pub fn router(max_file_size: u64) -> Router<AppState> {
    let limit = usize::try_from(max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);
    Router::new()
        .route("/", post(upload_media))
        .layer(DefaultBodyLimit::max(limit))
}

/// POST /api/admin/media
async fn upload_media(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let config = &state.upload_config;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation_error(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        if !config.is_type_allowed(&content_type) {
            return Err(ApiError::validation_error(format!(
                "File type not allowed: {}. Allowed types: {}",
                content_type,
                config.allowed_types.join(", ")
            )));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation_error(format!("Failed to read file: {}", e)))?;

        if data.len() as u64 > config.max_file_size {
            return Err(ApiError::validation_error(format!(
                "File too large. Maximum size: {} bytes",
                config.max_file_size
            )));
        }

        ensure_upload_dir(&config.path).await?;

        let filename = format!("{}.{}", Uuid::new_v4(), config.get_extension(&content_type));
        fs::write(config.path.join(&filename), &data)
            .await
            .map_err(|e| {
                tracing::error!("Failed to save upload {}: {}", filename, e);
                ApiError::internal_error("Failed to save file")
            })?;
        tracing::info!("{} uploaded {} ({} bytes)", user.email, filename, data.len());

        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                url: format!("/uploads/{}", filename),
                filename,
                size: data.len() as u64,
                content_type,
            }),
        ));
    }

    Err(ApiError::validation_error("No file provided"))
}

async fn ensure_upload_dir(path: &Path) -> Result<(), ApiError> {
    fs::create_dir_all(path).await.map_err(|e| {
        tracing::error!("Failed to create upload dir {}: {}", path.display(), e);
        ApiError::internal_error("Failed to create upload directory")
    })
}
