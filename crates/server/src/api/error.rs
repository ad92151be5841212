use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use providers::ChatError;
use shared::agent_api::ErrorBody;

/// Every error the HTTP layer can answer with. All of them render as a JSON
/// [`ErrorBody`]; none is used once a stream has started.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("No file uploaded")]
    NoFileUploaded,

    #[error("Invalid request body")]
    InvalidBody(String),

    #[error("Server error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Chat(err) if err.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::NoFileUploaded | ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Chat(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let body = ErrorBody::new(self.to_string());
        match self {
            ApiError::Chat(err) => match err.details() {
                Some(details) => body.with_details(details),
                None => body,
            },
            ApiError::InvalidBody(details) => body.with_details(details.clone()),
            // Internal detail stays in the log.
            ApiError::NoFileUploaded | ApiError::Internal(_) => body,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!("Server error: {}", detail);
        }
        (self.status(), Json(self.body())).into_response()
    }
}
