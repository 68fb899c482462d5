use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Identity of a submission for de-duplication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobFingerprint {
    pub owner_id: String,
    pub reference_artifact_id: String,
    pub target_artifact_id: String,
}

impl JobFingerprint {
    pub fn new(owner_id: &str, reference_artifact_id: &str, target_artifact_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            reference_artifact_id: reference_artifact_id.to_string(),
            target_artifact_id: target_artifact_id.to_string(),
        }
    }
}

/// Jobs that are currently running, keyed by fingerprint.
///
/// At most one job per fingerprint is in flight. Claims are released when the
/// job reaches a terminal state, and expire after `max_age` so a job whose
/// worker went silent cannot block resubmission forever.
pub struct InFlightRegistry {
    jobs: Mutex<HashMap<JobFingerprint, Claim>>,
    max_age: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Claim {
    job_id: Uuid,
    claimed_at: Instant,
}

impl Default for InFlightRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(1800))
    }
}

impl InFlightRegistry {
    pub fn new(max_age: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            max_age,
        }
    }

    /// Claim `fingerprint` for `job_id`. Returns the job already holding it
    /// when there is one. Expired claims are dropped first.
    pub fn try_claim(&self, fingerprint: JobFingerprint, job_id: Uuid) -> Result<(), Uuid> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        let before = jobs.len();
        jobs.retain(|_, claim| claim.claimed_at.elapsed() < self.max_age);
        if jobs.len() < before {
            tracing::info!(expired = before - jobs.len(), "Dropped expired in-flight claims");
        }

        if let Some(existing) = jobs.get(&fingerprint) {
            return Err(existing.job_id);
        }
        jobs.insert(
            fingerprint,
            Claim {
                job_id,
                claimed_at: Instant::now(),
            },
        );
        metrics::gauge!("match_jobs_in_flight").set(jobs.len() as f64);
        Ok(())
    }

    pub fn release(&self, job_id: Uuid) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.retain(|_, claim| claim.job_id != job_id);
        metrics::gauge!("match_jobs_in_flight").set(jobs.len() as f64);
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
