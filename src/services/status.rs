use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use crate::config::WorkerMode;
use crate::error::AppResult;
use crate::models::api::JobStatusResponse;
use crate::models::job::{JobOutcome, MatchJob};
use crate::services::completion::JobFinalizer;
use crate::services::poller::{
    poll_until_terminal, PollOutcome, PollPolicy, RemoteStatusSource, StatusSource,
    StoreStatusSource, TIMED_OUT,
};
use crate::services::worker::WorkerBackend;
use crate::store::JobStore;

/// Result of waiting for a job.
#[derive(Debug)]
pub enum WaitResult {
    Finished(JobStatusResponse),
    TransportAborted(String),
    TimedOut,
}

impl IntoResponse for WaitResult {
    fn into_response(self) -> Response {
        match self {
            WaitResult::Finished(body) => (StatusCode::OK, Json(body)).into_response(),
            WaitResult::TransportAborted(error) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "status": "failed", "error": error, "code": "BAD_GATEWAY" })),
            )
                .into_response(),
            WaitResult::TimedOut => (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({ "status": "failed", "error": TIMED_OUT, "code": "GATEWAY_TIMEOUT" })),
            )
                .into_response(),
        }
    }
}

/// Answers status queries, consulting the remote worker where it owns the
/// truth and recording what it reports.
pub struct StatusService {
    store: Arc<dyn JobStore>,
    backend: Arc<dyn WorkerBackend>,
    finalizer: Arc<JobFinalizer>,
    policy: PollPolicy,
}

impl StatusService {
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn WorkerBackend>,
        finalizer: Arc<JobFinalizer>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            store,
            backend,
            finalizer,
            policy,
        }
    }

    /// One status observation without waiting.
    pub async fn current(&self, job: &MatchJob, credentials: &str) -> AppResult<JobStatusResponse> {
        if job.status.is_terminal() {
            return Ok(JobStatusResponse::from_job(job).with_frame_urls(job.id));
        }

        let Some(report) = self.backend.fetch_status(job, credentials).await? else {
            return Ok(JobStatusResponse::from_job(job));
        };

        match report.into_outcome() {
            Some(outcome) => Ok(self.record(job, outcome).await?),
            None => Ok(JobStatusResponse::processing()),
        }
    }

    /// Block until the job is terminal or the poll budget runs out.
    pub async fn wait(&self, job: &MatchJob, credentials: &str) -> AppResult<WaitResult> {
        if job.status.is_terminal() {
            return Ok(WaitResult::Finished(
                JobStatusResponse::from_job(job).with_frame_urls(job.id),
            ));
        }

        let source: Box<dyn StatusSource> = match self.backend.mode() {
            WorkerMode::Remote => Box::new(RemoteStatusSource::new(
                self.backend.clone(),
                job.clone(),
                credentials,
            )),
            WorkerMode::Local => Box::new(StoreStatusSource::new(self.store.clone(), job.id)),
        };

        tracing::info!(job_id = %job.id, max_attempts = self.policy.max_attempts, "Waiting for job");
        let result = match poll_until_terminal(source.as_ref(), self.policy).await {
            PollOutcome::Terminal(outcome) => WaitResult::Finished(self.record(job, outcome).await?),
            PollOutcome::TransportAborted { error } => {
                tracing::warn!(job_id = %job.id, error = %error, "Stopped waiting after repeated failures");
                WaitResult::TransportAborted(error)
            }
            PollOutcome::TimedOut { attempts } => {
                tracing::warn!(job_id = %job.id, attempts, "Timed out waiting for job");
                WaitResult::TimedOut
            }
        };
        Ok(result)
    }

    /// Persist an observed terminal outcome. A job finalized elsewhere first
    /// keeps its stored result, which is what gets returned.
    async fn record(&self, job: &MatchJob, outcome: JobOutcome) -> AppResult<JobStatusResponse> {
        let response = match self.finalizer.finalize(job.id, &outcome).await? {
            Some(updated) => JobStatusResponse::from_job(&updated),
            None => match self.store.get(job.id).await {
                Ok(stored) if stored.status.is_terminal() => JobStatusResponse::from_job(&stored),
                _ => JobStatusResponse::from_outcome(&outcome),
            },
        };
        Ok(response.with_frame_urls(job.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::artifact::MediaArtifact;
    use crate::models::job::{JobStatus, NewJob};
    use crate::services::inflight::InFlightRegistry;
    use crate::services::worker::{PreparedRun, ProxiedResponse, WorkerError, WorkerReport};
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    /// Remote worker whose status answers are scripted.
    struct ScriptedWorker {
        answers: Mutex<Vec<Result<&'static str, ()>>>,
    }

    #[async_trait]
    impl WorkerBackend for ScriptedWorker {
        fn mode(&self) -> WorkerMode {
            WorkerMode::Remote
        }
        async fn liveness(&self) -> Result<(), WorkerError> {
            Ok(())
        }
        async fn prepare(
            &self,
            _: Uuid,
            _: &MediaArtifact,
            _: &MediaArtifact,
            _: &str,
        ) -> Result<PreparedRun, WorkerError> {
            unreachable!()
        }
        async fn launch(&self, _: Uuid, _: PreparedRun) -> Result<(), WorkerError> {
            unreachable!()
        }
        async fn fetch_status(&self, _: &MatchJob, _: &str) -> Result<Option<WorkerReport>, WorkerError> {
            let mut answers = self.answers.lock().unwrap();
            let next = if answers.is_empty() {
                Ok(r#"{"status": "processing"}"#)
            } else {
                answers.remove(0)
            };
            match next {
                Ok(body) => Ok(Some(serde_json::from_str(body).unwrap())),
                Err(()) => Err(WorkerError::Unavailable("connection refused".into())),
            }
        }
        async fn fetch_frame(
            &self,
            _: &MatchJob,
            _: &str,
            _: &str,
        ) -> Result<Option<ProxiedResponse>, WorkerError> {
            Ok(None)
        }
    }

    const COMPLETED: &str = r#"{"status": "completed", "match_count": 1, "error": null,
        "matches": [{"timestamp": 5.0, "distance": 0.4, "frame_number": 150,
                     "position": {"x": 1, "y": 2, "width": 3, "height": 4},
                     "frame_url": "/api/python/frame/t1/0_150.jpg"}]}"#;

    async fn setup(answers: Vec<Result<&'static str, ()>>) -> (Arc<MemoryJobStore>, StatusService, MatchJob) {
        let store = Arc::new(MemoryJobStore::new());
        let job = store
            .create(
                NewJob::processing(Uuid::new_v4(), "u1", "img1", "vid1")
                    .with_worker_task_id(Some("t1".into())),
            )
            .await
            .unwrap();
        let finalizer = Arc::new(JobFinalizer::new(store.clone(), Arc::new(InFlightRegistry::default())));
        let service = StatusService::new(
            store.clone(),
            Arc::new(ScriptedWorker {
                answers: Mutex::new(answers),
            }),
            finalizer,
            PollPolicy {
                interval: Duration::from_secs(5),
                max_attempts: 60,
                max_consecutive_failures: 3,
            },
        );
        (store, service, job)
    }

    #[tokio::test]
    async fn test_remote_terminal_status_is_recorded_once() {
        let (store, service, job) = setup(vec![Ok(COMPLETED), Ok(r#"{"status": "failed", "error": "late"}"#)]).await;

        let first = service.current(&job, "tok").await.unwrap();
        assert_eq!(first.status, JobStatus::Completed);
        assert_eq!(
            first.matches.unwrap()[0].frame_url.as_deref(),
            Some(format!("/jobs/{}/frames/0_150", job.id).as_str())
        );

        // A contradicting later observation does not overwrite the record.
        let second = service.current(&job, "tok").await.unwrap();
        assert_eq!(second.status, JobStatus::Completed);
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_processing_passes_through() {
        let (_, service, job) = setup(vec![]).await;
        assert_eq!(service.current(&job, "tok").await.unwrap(), JobStatusResponse::processing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_records_completion() {
        let (store, service, job) = setup(vec![Ok(r#"{"status": "processing"}"#), Ok(COMPLETED)]).await;

        match service.wait(&job, "tok").await.unwrap() {
            WaitResult::Finished(body) => assert_eq!(body.match_count, Some(1)),
            other => panic!("expected finished, got {other:?}"),
        }
        assert_eq!(store.get(job.id).await.unwrap().match_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_distinctly() {
        let (store, service, job) = setup(vec![]).await;

        let result = service.wait(&job, "tok").await.unwrap();
        assert!(matches!(result, WaitResult::TimedOut));
        assert_eq!(result.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_aborts_on_repeated_transport_failures() {
        let (_, service, job) = setup(vec![Err(()), Err(()), Err(())]).await;

        let result = service.wait(&job, "tok").await.unwrap();
        assert!(matches!(&result, WaitResult::TransportAborted(e) if e.starts_with("Failed to check task status")));
        assert_eq!(result.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
