use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::auth::Session;
use crate::models::api::WorkerStatusResponse;

/// GET /worker/status: whether the recognition worker can take jobs.
pub async fn worker_status(
    State(state): State<AppState>,
    _session: Session,
) -> (StatusCode, Json<WorkerStatusResponse>) {
    match state.backend.liveness().await {
        Ok(()) => (
            StatusCode::OK,
            Json(WorkerStatusResponse {
                status: "online",
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(WorkerStatusResponse {
                status: "offline",
                message: Some(e.to_string()),
            }),
        ),
    }
}
