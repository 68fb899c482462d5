use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::services::worker::{ProxiedResponse, WorkerError};
use crate::store::StoreError;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce `{ "error": ..., "code": ... }`
/// bodies. Errors coming back from a remote worker are forwarded unchanged.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Artifact media kind does not fit its role in the job.
    #[error("Invalid artifact kind: {0}")]
    InvalidKind(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// Non-success response from the remote worker, passed through as-is.
    #[error("Remote worker responded with {}", .0.status)]
    Upstream(ProxiedResponse),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<WorkerError> for AppError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
            WorkerError::Upstream(response) => AppError::Upstream(response),
            WorkerError::Transport(e) => AppError::BadGateway(e.to_string()),
            WorkerError::InvalidResponse(msg) => AppError::BadGateway(msg),
            WorkerError::ResourceMissing(msg) => AppError::NotFound(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<garde::Report> for AppError {
    fn from(report: garde::Report) -> Self {
        AppError::Validation(report.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Upstream(response) => return response.into_response(),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            AppError::InvalidKind(msg) => (StatusCode::BAD_REQUEST, "INVALID_KIND", msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
            }
            AppError::BadGateway(msg) => {
                tracing::warn!(error = %msg, "Remote worker unreachable");
                (StatusCode::BAD_GATEWAY, "BAD_GATEWAY", msg)
            }
            AppError::Store(err) => classify_store_error(err),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, axum::Json(json!({ "error": message, "code": code }))).into_response()
    }
}

fn classify_store_error(err: StoreError) -> (StatusCode, &'static str, String) {
    match err {
        StoreError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Job {id} not found"),
        ),
        err @ StoreError::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT", err.to_string()),
        other => {
            tracing::error!(error = %other, "Store error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;
    use http_body_util::BodyExt;
    use uuid::Uuid;

    async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_invalid_kind_maps_to_400() {
        let (status, body) =
            error_to_response(AppError::InvalidKind("Reference file must be an image".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_KIND");
        assert_eq!(body["error"], "Reference file must be an image");
    }

    #[tokio::test]
    async fn test_store_conflict_maps_to_409() {
        let err = AppError::Store(StoreError::Conflict {
            id: Uuid::nil(),
            expected: JobStatus::Processing,
            actual: JobStatus::Completed,
        });
        let (status, body) = error_to_response(err).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn test_internal_message_is_sanitized() {
        let (status, body) = error_to_response(AppError::Internal("db password leaked".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "An internal error occurred");
    }

    #[tokio::test]
    async fn test_upstream_is_forwarded_unchanged() {
        let upstream = ProxiedResponse {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            content_type: Some("application/json".into()),
            body: bytes_of(r#"{"detail":"bad video"}"#),
        };
        let (status, body) = error_to_response(AppError::Upstream(upstream)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body, serde_json::json!({"detail": "bad video"}));
    }

    fn bytes_of(s: &'static str) -> axum::body::Bytes {
        axum::body::Bytes::from_static(s.as_bytes())
    }
}
