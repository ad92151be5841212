use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiError;
use crate::state::AppState;

const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Path the file is served from, relative to the server root.
    pub url: String,
}

/// POST /api/upload
///
/// Stores the `file` part under a random name and returns its URL. Other
/// fields, and a plain text field named `file`, are ignored.
pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let Ok(mut multipart) = multipart else {
        return Err(ApiError::NoFileUploaded);
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidBody(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) || field.file_name().is_none() {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidBody(e.body_text()))?;

        let name = Uuid::new_v4().simple().to_string();
        let path = state.settings.upload_dir.join(&name);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to store {:?}: {}", path, e)))?;

        tracing::info!(file = %name, bytes = data.len(), "stored upload");
        return Ok(Json(UploadResponse {
            url: format!("/uploads/{}", name),
        }));
    }

    Err(ApiError::NoFileUploaded)
}
