use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::Session;
use crate::error::AppResult;
use crate::models::api::{
    frame_path, JobListResponse, JobStatusResponse, ListJobsQuery, SubmitJobRequest,
    SubmitJobResponse,
};
use crate::models::job::MatchJob;
use crate::services::status::WaitResult;

/// Load a job the caller may see.
pub(crate) async fn authorized_job(
    state: &AppState,
    session: &Session,
    job_id: Uuid,
) -> AppResult<MatchJob> {
    let job = state.store.get(job_id).await?;
    session.authorize(&job)?;
    Ok(job)
}

/// POST /jobs: start comparing a reference image against a video.
pub async fn submit_job(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<SubmitJobRequest>,
) -> AppResult<(StatusCode, Json<SubmitJobResponse>)> {
    let response = state.submissions.submit(&session, request).await?;
    let status = if response.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(response)))
}

/// GET /jobs: the caller's jobs, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<ListJobsQuery>,
) -> AppResult<Json<JobListResponse>> {
    let (jobs, total) = state
        .store
        .list_by_owner(
            &session.user_id,
            i64::from(query.limit()),
            query.offset(),
        )
        .await?;
    Ok(Json(JobListResponse::new(
        jobs.into_iter().map(with_frame_urls).collect(),
        &query,
        total,
    )))
}

/// GET /jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    session: Session,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<MatchJob>> {
    let job = authorized_job(&state, &session, job_id).await?;
    Ok(Json(with_frame_urls(job)))
}

/// GET /jobs/{job_id}/status
pub async fn job_status(
    State(state): State<AppState>,
    session: Session,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobStatusResponse>> {
    let job = authorized_job(&state, &session, job_id).await?;
    Ok(Json(state.status.current(&job, &session.token).await?))
}

/// GET /jobs/{job_id}/wait: hold the request until the job is terminal.
pub async fn wait_for_job(
    State(state): State<AppState>,
    session: Session,
    Path(job_id): Path<Uuid>,
) -> AppResult<WaitResult> {
    let job = authorized_job(&state, &session, job_id).await?;
    state.status.wait(&job, &session.token).await
}

fn with_frame_urls(mut job: MatchJob) -> MatchJob {
    let id = job.id;
    for (index, m) in job.matches.iter_mut().enumerate() {
        m.frame_url = Some(frame_path(id, index, m.frame_number));
    }
    job
}
