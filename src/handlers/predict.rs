//! Prediction endpoint - multipart image intake for the relay
//!
//! Accepts a multipart form with an `image` field. Type and size are checked
//! before anything touches the disk; the upload lives under a unique name in
//! the configured directory only for the duration of the classifier run.

use std::path::{Path, PathBuf};

use axum::extract::{Multipart, State};
use axum::Json;
use tokio::fs;
use uuid::Uuid;

use crate::middleware::auth::UserContext;
use crate::relay::PredictionResult;
use crate::{AppError, AppResult, AppState};

const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const ALLOWED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

/// Prediction endpoint
pub async fn predict(
    State(state): State<AppState>,
    user: UserContext,
    mut multipart: Multipart,
) -> AppResult<Json<PredictionResult>> {
    let mut upload: Option<PathBuf> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!("Failed to read multipart field: {}", e);
        AppError::Validation("Malformed multipart payload".to_string())
    })? {
        if field.name() != Some("image") {
            tracing::warn!("Unknown multipart field: {:?}", field.name());
            continue;
        }

        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Validation("Image filename missing".to_string()))?;

        // Reject unsupported uploads before writing anything or spawning the
        // classifier
        let ext = Path::new(&filename)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(AppError::UnsupportedMedia(
                "Only JPG, JPEG and PNG images are supported".to_string(),
            ));
        }
        if let Some(content_type) = field.content_type() {
            if !ALLOWED_CONTENT_TYPES.contains(&content_type) {
                return Err(AppError::UnsupportedMedia(
                    "Only JPG, JPEG and PNG images are supported".to_string(),
                ));
            }
        }

        let data = field.bytes().await.map_err(|e| {
            tracing::warn!("Failed to read image data: {}", e);
            AppError::Validation("Failed to read image data".to_string())
        })?;

        if data.len() > state.config.max_upload_bytes {
            return Err(AppError::PayloadTooLarge);
        }
        if data.is_empty() {
            return Err(AppError::Validation("Image file is empty".to_string()));
        }

        fs::create_dir_all(&state.config.upload_dir)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create upload directory: {}", e)))?;

        let path = state
            .config
            .upload_dir
            .join(format!("{}.{}", Uuid::new_v4(), ext));
        fs::write(&path, &data)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to store upload: {}", e)))?;

        tracing::debug!(
            "Saved uploaded image: {} ({} bytes)",
            path.display(),
            data.len()
        );
        upload = Some(path);
    }

    let path = upload.ok_or_else(|| AppError::Validation("No image file provided".to_string()))?;

    tracing::info!(uid = %user.uid, image = %path.display(), "Running fracture prediction");

    let result = state.relay.predict(&path).await;

    // The upload is transient regardless of the classifier outcome
    if let Err(e) = fs::remove_file(&path).await {
        tracing::warn!("Failed to remove uploaded image {}: {}", path.display(), e);
    }

    Ok(Json(result?))
}
