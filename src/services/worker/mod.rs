//! Recognition worker backends.
//!
//! The worker is either spawned per job as a child process
//! ([`LocalProcessBackend`]) or reached over HTTP as a long-lived service
//! ([`RemoteServiceBackend`]). One of the two is chosen at start-up and shared
//! through [`crate::app_state::AppState`].

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::WorkerMode;
use crate::models::artifact::MediaArtifact;
use crate::models::job::{JobOutcome, Match, MatchJob};

pub mod local;
pub mod remote;

pub use local::{LocalProcessBackend, LocalRun, LocalWorkerSettings};
pub use remote::RemoteServiceBackend;

#[async_trait]
pub trait WorkerBackend: Send + Sync {
    fn mode(&self) -> WorkerMode;

    /// Cheap reachability probe.
    async fn liveness(&self) -> Result<(), WorkerError>;

    /// Resolve inputs and hand the work to the worker where that can happen
    /// before the job record exists.
    ///
    /// [`WorkerError::ResourceMissing`] means the job should be recorded as
    /// failed; [`WorkerError::Unavailable`] means no job should be recorded.
    async fn prepare(
        &self,
        job_id: Uuid,
        reference: &MediaArtifact,
        target: &MediaArtifact,
        credentials: &str,
    ) -> Result<PreparedRun, WorkerError>;

    /// Start work whose job record now exists. Never waits for completion.
    async fn launch(&self, job_id: Uuid, run: PreparedRun) -> Result<(), WorkerError>;

    /// The worker's own view of a job, or `None` when the job store is the
    /// only source of truth.
    async fn fetch_status(
        &self,
        job: &MatchJob,
        credentials: &str,
    ) -> Result<Option<WorkerReport>, WorkerError>;

    /// A frame served by the worker itself, or `None` when frames are only
    /// reachable on the local filesystem.
    async fn fetch_frame(
        &self,
        job: &MatchJob,
        frame_id: &str,
        credentials: &str,
    ) -> Result<Option<ProxiedResponse>, WorkerError>;
}

/// Work accepted by a backend whose job record has not been written yet.
#[derive(Debug)]
pub enum PreparedRun {
    /// Command line ready to spawn once the record exists.
    Local(LocalRun),
    /// Already forwarded; the remote service assigned `task_id`.
    Remote { task_id: String },
}

impl PreparedRun {
    pub fn worker_task_id(&self) -> Option<String> {
        match self {
            PreparedRun::Local(_) => None,
            PreparedRun::Remote { task_id } => Some(task_id.clone()),
        }
    }
}

/// Status as reported by the worker.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportedStatus {
    Pending,
    Processing,
    Completed,
    /// The remote service answers `error` when it cannot read its own result.
    #[serde(alias = "error")]
    Failed,
}

/// Result document written by a local worker or served by a remote one.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerReport {
    pub status: ReportedStatus,
    #[serde(default, rename = "matchCount", alias = "match_count")]
    pub match_count: Option<i64>,
    #[serde(default)]
    pub matches: Option<Vec<Match>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl WorkerReport {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ReportedStatus::Completed | ReportedStatus::Failed
        )
    }

    /// Terminal outcome, or `None` while the worker is still running.
    pub fn into_outcome(self) -> Option<JobOutcome> {
        match self.status {
            ReportedStatus::Completed => {
                let matches = self.matches.unwrap_or_default();
                if let Some(reported) = self.match_count {
                    if reported != matches.len() as i64 {
                        tracing::warn!(
                            reported,
                            actual = matches.len(),
                            "Worker match count disagrees with match list"
                        );
                    }
                }
                Some(JobOutcome::Completed { matches })
            }
            ReportedStatus::Failed => Some(JobOutcome::failed(
                self.error
                    .or(self.message)
                    .unwrap_or_else(|| "Unknown error".to_string()),
            )),
            ReportedStatus::Pending | ReportedStatus::Processing => None,
        }
    }
}

/// A response read from the remote worker, replayable to the client as-is.
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl ProxiedResponse {
    pub async fn read(response: reqwest::Response) -> Result<Self, WorkerError> {
        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        Ok(Self {
            status,
            content_type,
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"))
    }
}

impl IntoResponse for ProxiedResponse {
    fn into_response(self) -> Response {
        match self.content_type {
            Some(content_type) => (self.status, [(CONTENT_TYPE, content_type)], self.body).into_response(),
            None => (self.status, self.body).into_response(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    ResourceMissing(String),

    #[error("Failed to start worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Remote worker responded with {}", .0.status)]
    Upstream(ProxiedResponse),

    #[error("Invalid worker response: {0}")]
    InvalidResponse(String),
}
