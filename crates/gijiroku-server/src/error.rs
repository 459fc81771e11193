//! Error-to-envelope mapping for the HTTP surface.
//!
//! Internal errors never leak raw; every failure becomes the common
//! envelope with one of the client-visible codes and a fixed status.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gijiroku_common::AppError;
use gijiroku_protocol::ApiEnvelope;
use gijiroku_store::StoreError;

#[derive(Debug)]
pub struct ApiFailure {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiFailure {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "JOB_NOT_FOUND", message)
    }

    pub fn not_completed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "JOB_NOT_COMPLETED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", message)
    }
}

/// Fixed code → HTTP status table.
fn status_for(code: &str) -> StatusCode {
    match code {
        "FILE_TOO_LARGE" => StatusCode::PAYLOAD_TOO_LARGE,
        "INVALID_FORMAT" => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        "EMPTY_FILE" | "CORRUPT_FILE" | "INVALID_REQUEST" => StatusCode::BAD_REQUEST,
        "JOB_NOT_FOUND" => StatusCode::NOT_FOUND,
        "JOB_NOT_COMPLETED" | "CANCELLED" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<AppError> for ApiFailure {
    fn from(err: AppError) -> Self {
        let code = err.code();
        Self::new(status_for(code), code, err.to_string())
    }
}

impl From<StoreError> for ApiFailure {
    fn from(err: StoreError) -> Self {
        AppError::from(err).into()
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let envelope: ApiEnvelope<serde_json::Value> =
            ApiEnvelope::failure(self.code, self.message);
        (self.status, Json(envelope)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_table() {
        assert_eq!(status_for("FILE_TOO_LARGE"), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(status_for("INVALID_FORMAT"), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(status_for("CORRUPT_FILE"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("JOB_NOT_FOUND"), StatusCode::NOT_FOUND);
        assert_eq!(status_for("JOB_NOT_COMPLETED"), StatusCode::CONFLICT);
        assert_eq!(status_for("WHISPER_TIMEOUT"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_app_error_conversion_keeps_code() {
        let failure = ApiFailure::from(AppError::FileTooLarge(99_999_999));
        assert_eq!(failure.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(failure.code, "FILE_TOO_LARGE");
        assert!(failure.message.contains("99999999"));
    }
}
