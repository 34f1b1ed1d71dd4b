pub mod children;
pub mod config;
pub mod objects;
pub mod raw;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use multidrive_common::error::StorageError;

/// Storage failure on its way out of a handler.
pub struct ApiError(pub StorageError);

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        status_for(&self.0)
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            StorageError::NotFound(_) => "not_found",
            StorageError::SessionInvalid(_) => "session_invalid",
            StorageError::InvalidInput(_) => "invalid_input",
            StorageError::Configuration(_) => "configuration",
            StorageError::BackendProtocol { .. } => "backend_error",
            StorageError::Http(_) => "backend_unreachable",
            StorageError::Io(_) => "io_error",
            StorageError::Serialization(_) => "serialization",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "Storage request failed");
        }
        (status, Json(error_json(self.code(), &self.0.to_string()))).into_response()
    }
}

pub fn status_for(err: &StorageError) -> StatusCode {
    match err {
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::SessionInvalid(_) => StatusCode::GONE,
        StorageError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        StorageError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        StorageError::BackendProtocol { status, .. } => StatusCode::from_u16(*status)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY),
        StorageError::Http(_) => StatusCode::BAD_GATEWAY,
        StorageError::Io(_) | StorageError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_json(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({ "error": { "code": code, "message": message } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&StorageError::NotFound("k".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&StorageError::SessionInvalid("x".into())), StatusCode::GONE);
        assert_eq!(status_for(&StorageError::InvalidInput("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&StorageError::config("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&StorageError::protocol("S3 PutObject", 403, "")),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&StorageError::protocol("S3 PutObject", 200, "<Error/>")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&StorageError::protocol("S3 PutObject", 302, "")),
            StatusCode::BAD_GATEWAY
        );
    }
}
