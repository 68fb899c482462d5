//! Bounded wait for a job to reach a terminal state.
//!
//! The loop is a plain future. Dropping it (for example when the HTTP client
//! disconnects) stops polling at the next await point.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::job::{JobOutcome, MatchJob};
use crate::services::worker::{WorkerBackend, WorkerError};
use crate::store::{JobStore, StoreError};

/// Message returned when the attempt budget runs out.
pub const TIMED_OUT: &str =
    "Processing timed out. The video may be too large or complex to process.";

/// One observation of a running job.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// `Ok(None)` while the job is still running.
    async fn observe(&self) -> Result<Option<JobOutcome>, ObserveError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_consecutive_failures: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
            max_consecutive_failures: 3,
        }
    }
}

impl PollPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.poll_max_attempts.max(1),
            max_consecutive_failures: config.poll_max_transport_failures.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The job finished, successfully or not.
    Terminal(JobOutcome),
    /// Too many consecutive failed observations.
    TransportAborted { error: String },
    /// Budget exhausted while the job was still running.
    TimedOut { attempts: u32 },
}

/// Observe `source` until it reports a terminal outcome.
///
/// Every observation uses one attempt whether it succeeds or not. A
/// successful observation resets the consecutive failure count.
pub async fn poll_until_terminal(source: &dyn StatusSource, policy: PollPolicy) -> PollOutcome {
    let mut consecutive_failures = 0;

    for attempt in 1..=policy.max_attempts {
        match source.observe().await {
            Ok(Some(outcome)) => {
                tracing::debug!(attempt, status = %outcome.status(), "Job reached terminal state");
                return PollOutcome::Terminal(outcome);
            }
            Ok(None) => consecutive_failures = 0,
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(
                    attempt,
                    consecutive_failures,
                    error = %e,
                    "Status check failed"
                );
                if consecutive_failures >= policy.max_consecutive_failures {
                    return PollOutcome::TransportAborted {
                        error: format!("Failed to check task status: {e}"),
                    };
                }
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    tracing::warn!(attempts = policy.max_attempts, "Gave up waiting for job");
    PollOutcome::TimedOut {
        attempts: policy.max_attempts,
    }
}

/// Asks the remote worker service.
pub struct RemoteStatusSource {
    backend: Arc<dyn WorkerBackend>,
    job: MatchJob,
    credentials: String,
}

impl RemoteStatusSource {
    pub fn new(backend: Arc<dyn WorkerBackend>, job: MatchJob, credentials: impl Into<String>) -> Self {
        Self {
            backend,
            job,
            credentials: credentials.into(),
        }
    }
}

#[async_trait]
impl StatusSource for RemoteStatusSource {
    async fn observe(&self) -> Result<Option<JobOutcome>, ObserveError> {
        let report = self.backend.fetch_status(&self.job, &self.credentials).await?;
        Ok(report.and_then(|r| r.into_outcome()))
    }
}

/// Reads the job store, which a local worker's completion handler updates.
pub struct StoreStatusSource {
    store: Arc<dyn JobStore>,
    job_id: Uuid,
}

impl StoreStatusSource {
    pub fn new(store: Arc<dyn JobStore>, job_id: Uuid) -> Self {
        Self { store, job_id }
    }
}

#[async_trait]
impl StatusSource for StoreStatusSource {
    async fn observe(&self) -> Result<Option<JobOutcome>, ObserveError> {
        let job = self.store.get(self.job_id).await?;
        Ok(JobOutcome::from_job(&job))
    }
}
