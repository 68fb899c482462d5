//! Job submission: validation, de-duplication and dispatch to the worker.

use axum::http::StatusCode;
use garde::Validate;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Session;
use crate::error::{AppError, AppResult};
use crate::models::api::{SubmitJobRequest, SubmitJobResponse};
use crate::models::artifact::{MediaArtifact, MediaKind};
use crate::models::job::{JobOutcome, JobStatus, NewJob};
use crate::services::completion::JobFinalizer;
use crate::services::inflight::{InFlightRegistry, JobFingerprint};
use crate::services::worker::{WorkerBackend, WorkerError};
use crate::store::{ArtifactCatalog, JobStore, StoreError};

/// Error recorded for a job its remote worker has forgotten.
pub const TASK_LOST: &str = "Task not found on worker";

pub struct SubmissionService {
    store: Arc<dyn JobStore>,
    catalog: Arc<dyn ArtifactCatalog>,
    backend: Arc<dyn WorkerBackend>,
    in_flight: Arc<InFlightRegistry>,
    finalizer: Arc<JobFinalizer>,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn JobStore>,
        catalog: Arc<dyn ArtifactCatalog>,
        backend: Arc<dyn WorkerBackend>,
        in_flight: Arc<InFlightRegistry>,
        finalizer: Arc<JobFinalizer>,
    ) -> Self {
        Self {
            store,
            catalog,
            backend,
            in_flight,
            finalizer,
        }
    }

    /// Create a job for `request` and hand it to the worker.
    ///
    /// Returns once the worker has been started; never waits for it. When a
    /// required input disappeared the job is still recorded, as `failed`.
    pub async fn submit(
        &self,
        session: &Session,
        request: SubmitJobRequest,
    ) -> AppResult<SubmitJobResponse> {
        request.validate()?;

        let reference = self
            .owned_artifact(session, &request.reference_artifact_id, "Reference image not found")
            .await?;
        let target = self
            .owned_artifact(session, &request.target_artifact_id, "Video not found")
            .await?;

        if reference.kind != MediaKind::Image {
            return Err(AppError::InvalidKind("Reference file must be an image".into()));
        }
        if target.kind != MediaKind::Video {
            return Err(AppError::InvalidKind("Second file must be a video".into()));
        }

        let job_id = Uuid::new_v4();
        let fingerprint = JobFingerprint::new(&session.user_id, &reference.id, &target.id);
        if let Err(holder) = self.in_flight.try_claim(fingerprint.clone(), job_id) {
            let claimed = if self.holder_is_settled(holder, session).await? {
                self.in_flight.release(holder);
                self.in_flight.try_claim(fingerprint, job_id)
            } else {
                Err(holder)
            };

            if let Err(existing) = claimed {
                metrics::counter!("match_jobs_deduplicated_total").increment(1);
                tracing::info!(
                    job_id = %existing,
                    owner_id = %session.user_id,
                    "Identical job already running"
                );
                return Ok(SubmitJobResponse {
                    job_id: existing,
                    status: JobStatus::Processing,
                    message: "An identical job is already processing".into(),
                    deduplicated: true,
                    error: None,
                });
            }
        }

        let result = self.dispatch(job_id, session, &reference, &target).await;
        if result.is_err() {
            self.in_flight.release(job_id);
        }
        result
    }

    /// Whether the job holding a claim can no longer finish.
    ///
    /// A holder that is terminal in the store, or that the remote worker no
    /// longer knows (404 from its status endpoint), is settled; a task the
    /// worker has lost is recorded as failed. A holder not yet in the store
    /// is still being dispatched.
    async fn holder_is_settled(&self, holder: Uuid, session: &Session) -> AppResult<bool> {
        let job = match self.store.get(holder).await {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if job.status.is_terminal() {
            return Ok(true);
        }

        match self.backend.fetch_status(&job, &session.token).await {
            Err(WorkerError::Upstream(response)) if response.status == StatusCode::NOT_FOUND => {
                tracing::warn!(job_id = %holder, "Worker no longer knows running job");
                self.finalizer
                    .finalize(holder, &JobOutcome::failed(TASK_LOST))
                    .await?;
                Ok(true)
            }
            Ok(Some(report)) if report.is_terminal() => {
                if let Some(outcome) = report.into_outcome() {
                    self.finalizer.finalize(holder, &outcome).await?;
                }
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(e) => {
                tracing::debug!(job_id = %holder, error = %e, "Could not re-check running job");
                Ok(false)
            }
        }
    }

    async fn owned_artifact(
        &self,
        session: &Session,
        id: &str,
        missing: &str,
    ) -> AppResult<MediaArtifact> {
        let artifact = self
            .catalog
            .find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(missing.to_string()))?;
        if artifact.owner_id != session.user_id {
            return Err(AppError::Forbidden(
                "Artifact belongs to another user".into(),
            ));
        }
        Ok(artifact)
    }

    async fn dispatch(
        &self,
        job_id: Uuid,
        session: &Session,
        reference: &MediaArtifact,
        target: &MediaArtifact,
    ) -> AppResult<SubmitJobResponse> {
        let new_job = NewJob::processing(job_id, &session.user_id, &reference.id, &target.id);

        let run = match self
            .backend
            .prepare(job_id, reference, target, &session.token)
            .await
        {
            Ok(run) => run,
            Err(WorkerError::ResourceMissing(reason)) => {
                self.store.create(new_job).await?;
                metrics::counter!("match_jobs_submitted_total").increment(1);
                tracing::warn!(job_id = %job_id, reason = %reason, "Worker input missing");
                return self.fail(job_id, reason).await;
            }
            Err(e) => return Err(e.into()),
        };

        let job = self
            .store
            .create(new_job.with_worker_task_id(run.worker_task_id()))
            .await?;
        metrics::counter!("match_jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %job.id,
            owner_id = %job.owner_id,
            mode = %self.backend.mode(),
            "Job submitted"
        );

        if let Err(e) = self.backend.launch(job_id, run).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to launch worker");
            return self.fail(job_id, e.to_string()).await;
        }

        Ok(SubmitJobResponse {
            job_id,
            status: JobStatus::Processing,
            message: "Processing started".into(),
            deduplicated: false,
            error: None,
        })
    }

    async fn fail(&self, job_id: Uuid, reason: String) -> AppResult<SubmitJobResponse> {
        self.finalizer
            .finalize(job_id, &JobOutcome::failed(reason.clone()))
            .await?;
        Ok(SubmitJobResponse {
            job_id,
            status: JobStatus::Failed,
            message: "Job could not be started".into(),
            deduplicated: false,
            error: Some(reason),
        })
    }
}
