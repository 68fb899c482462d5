use axum::extract::{Path, State};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::Session;
use crate::error::{AppError, AppResult};
use crate::routes::jobs::authorized_job;
use crate::services::frames::{FrameId, ResolvedFrame};

/// GET /jobs/{job_id}/frames/{frame_id}: still image for one match.
///
/// `frame_id` is `{matchIndex}_{frameNumber}` with an optional extension.
pub async fn get_frame(
    State(state): State<AppState>,
    session: Session,
    Path((job_id, frame_id)): Path<(Uuid, String)>,
) -> AppResult<ResolvedFrame> {
    let frame = FrameId::parse(&frame_id)
        .ok_or_else(|| AppError::Validation("Invalid frame ID format".into()))?;
    let job = authorized_job(&state, &session, job_id).await?;

    Ok(state
        .frames
        .resolve(&job, frame, &frame_id, &session.token)
        .await?)
}
