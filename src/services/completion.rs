//! Terminal-state reconciliation for jobs.
//!
//! [`JobFinalizer`] is the only place that moves a job out of `processing`.
//! It is fed by [`CompletionHandler`] when a local worker process exits and by
//! the status service when a remote worker reports a terminal status.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{JobOutcome, JobStatus, MatchJob};
use crate::services::inflight::InFlightRegistry;
use crate::services::worker::WorkerReport;
use crate::store::{JobStore, StoreError};

/// Error recorded when the worker process exits nonzero.
pub const PROCESSING_FAILED: &str = "Processing failed";

const RECORD_ATTEMPTS: u32 = 3;
const RECORD_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Applies terminal outcomes through the store's conditional transition.
pub struct JobFinalizer {
    store: Arc<dyn JobStore>,
    in_flight: Arc<InFlightRegistry>,
}

impl JobFinalizer {
    pub fn new(store: Arc<dyn JobStore>, in_flight: Arc<InFlightRegistry>) -> Self {
        Self { store, in_flight }
    }

    /// Record `outcome` for a running job.
    ///
    /// Returns `Ok(None)` when the job was already terminal; the duplicate
    /// signal is dropped and the stored result is left untouched.
    pub async fn finalize(
        &self,
        job_id: Uuid,
        outcome: &JobOutcome,
    ) -> Result<Option<MatchJob>, StoreError> {
        match self
            .store
            .transition(job_id, JobStatus::Processing, outcome)
            .await
        {
            Ok(job) => {
                self.in_flight.release(job_id);
                match job.status {
                    JobStatus::Completed => {
                        metrics::counter!("match_jobs_completed_total").increment(1);
                        tracing::info!(
                            job_id = %job_id,
                            match_count = job.match_count,
                            "Job completed"
                        );
                    }
                    _ => {
                        metrics::counter!("match_jobs_failed_total").increment(1);
                        tracing::warn!(
                            job_id = %job_id,
                            error = job.error.as_deref().unwrap_or(""),
                            "Job failed"
                        );
                    }
                }
                Ok(Some(job))
            }
            Err(StoreError::Conflict { actual, .. }) => {
                self.in_flight.release(job_id);
                tracing::debug!(
                    job_id = %job_id,
                    current = %actual,
                    "Ignoring completion signal for job that is no longer processing"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Exit of a locally spawned worker.
#[derive(Debug, Clone)]
pub struct WorkerExit {
    pub job_id: Uuid,
    /// `None` when the process was killed by a signal or could not be awaited.
    pub exit_code: Option<i32>,
    pub result_path: PathBuf,
    pub stderr_tail: Option<String>,
}

/// Reconciles a worker's result file with its job record, once per exit.
pub struct CompletionHandler {
    finalizer: Arc<JobFinalizer>,
    timeout: Duration,
}

impl CompletionHandler {
    pub fn new(finalizer: Arc<JobFinalizer>, timeout: Duration) -> Self {
        Self { finalizer, timeout }
    }

    /// Drive the job to a terminal state. Errors, panics and timeouts while
    /// reading the result all end in `failed`.
    pub async fn handle(&self, exit: WorkerExit) -> Option<MatchJob> {
        let job_id = exit.job_id;
        let reconcile = AssertUnwindSafe(reconcile(&exit)).catch_unwind();

        let outcome = match tokio::time::timeout(self.timeout, reconcile).await {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(e))) => {
                tracing::warn!(
                    job_id = %job_id,
                    result_path = %exit.result_path.display(),
                    error = %e,
                    "Worker result unusable"
                );
                JobOutcome::failed(e.to_string())
            }
            Ok(Err(_)) => {
                tracing::error!(job_id = %job_id, "Completion handler panicked");
                JobOutcome::failed("Internal error while reading worker result")
            }
            Err(_) => {
                tracing::error!(
                    job_id = %job_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Timed out reconciling worker result"
                );
                JobOutcome::failed("Timed out reading worker result")
            }
        };

        self.record(job_id, outcome).await
    }

    async fn record(&self, job_id: Uuid, outcome: JobOutcome) -> Option<MatchJob> {
        for attempt in 1..=RECORD_ATTEMPTS {
            match self.finalizer.finalize(job_id, &outcome).await {
                Ok(job) => return job,
                Err(StoreError::NotFound(_)) => {
                    tracing::error!(job_id = %job_id, "Worker finished for a job that does not exist");
                    return None;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %job_id,
                        attempt,
                        error = %e,
                        "Failed to record job outcome"
                    );
                    if attempt < RECORD_ATTEMPTS {
                        tokio::time::sleep(RECORD_RETRY_DELAY).await;
                    }
                }
            }
        }
        None
    }
}

async fn reconcile(exit: &WorkerExit) -> Result<JobOutcome, CompletionError> {
    if exit.exit_code != Some(0) {
        tracing::warn!(
            job_id = %exit.job_id,
            exit_code = ?exit.exit_code,
            stderr = exit.stderr_tail.as_deref().unwrap_or(""),
            "Worker exited unsuccessfully"
        );
        return Ok(JobOutcome::failed(PROCESSING_FAILED));
    }

    let raw = tokio::fs::read(&exit.result_path)
        .await
        .map_err(CompletionError::ReadResult)?;
    let report: WorkerReport = serde_json::from_slice(&raw)?;
    report.into_outcome().ok_or(CompletionError::NotTerminal)
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Worker result could not be read: {0}")]
    ReadResult(#[source] std::io::Error),

    #[error("Invalid worker result: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Worker result did not report a terminal status")]
    NotTerminal,
}
