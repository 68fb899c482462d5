use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Status of a match job.
///
/// Jobs only move forward: `pending`/`processing` into one of the terminal
/// states, which are never left again.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Pending | JobStatus::Processing, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// Pixel rectangle of a detection inside its frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One detected occurrence of the reference subject inside the target video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Seconds from the start of the video.
    pub timestamp: f64,
    #[serde(alias = "frame")]
    pub frame_number: i64,
    /// Embedding distance, lower is more similar.
    pub distance: f64,
    #[serde(rename = "position", alias = "boundingBox", alias = "bounding_box")]
    pub bounding_box: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_url: Option<String>,
}

/// A reference-image vs. video comparison job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchJob {
    pub id: Uuid,
    pub owner_id: String,
    pub reference_artifact_id: String,
    pub target_artifact_id: String,
    pub status: JobStatus,
    pub match_count: i32,
    pub matches: Vec<Match>,
    pub error: Option<String>,
    /// Identifier the worker knows this job by. Remote workers assign their
    /// own task id; local workers are keyed by the job id itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl MatchJob {
    /// Key under which the worker stores artifacts for this job.
    pub fn worker_ref(&self) -> String {
        self.worker_task_id
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

/// Insert payload for [`MatchJob`]. Ids are generated by the caller so the
/// worker can be told where to write before the record exists.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub owner_id: String,
    pub reference_artifact_id: String,
    pub target_artifact_id: String,
    pub status: JobStatus,
    pub worker_task_id: Option<String>,
}

impl NewJob {
    pub fn processing(
        id: Uuid,
        owner_id: &str,
        reference_artifact_id: &str,
        target_artifact_id: &str,
    ) -> Self {
        Self {
            id,
            owner_id: owner_id.to_string(),
            reference_artifact_id: reference_artifact_id.to_string(),
            target_artifact_id: target_artifact_id.to_string(),
            status: JobStatus::Processing,
            worker_task_id: None,
        }
    }

    pub fn with_worker_task_id(mut self, task_id: Option<String>) -> Self {
        self.worker_task_id = task_id;
        self
    }
}

/// Terminal update applied to a job exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { matches: Vec<Match> },
    Failed { error: String },
}

impl JobOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        JobOutcome::Failed {
            error: error.into(),
        }
    }

    /// The outcome a terminal job was finalized with.
    pub fn from_job(job: &MatchJob) -> Option<Self> {
        match job.status {
            JobStatus::Completed => Some(JobOutcome::Completed {
                matches: job.matches.clone(),
            }),
            JobStatus::Failed => Some(JobOutcome::failed(
                job.error.clone().unwrap_or_else(|| "Unknown error".to_string()),
            )),
            JobStatus::Pending | JobStatus::Processing => None,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed { .. } => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn matches(&self) -> &[Match] {
        match self {
            JobOutcome::Completed { matches } => matches,
            JobOutcome::Failed { .. } => &[],
        }
    }

    /// Always derived from the matches so `match_count == len(matches)` holds.
    pub fn match_count(&self) -> i32 {
        self.matches().len() as i32
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobOutcome::Completed { .. } => None,
            JobOutcome::Failed { error } => Some(error),
        }
    }

    /// Apply the outcome to an in-memory record.
    pub fn apply_to(&self, job: &mut MatchJob, at: DateTime<Utc>) {
        job.status = self.status();
        job.matches = self.matches().to_vec();
        job.match_count = self.match_count();
        job.error = self.error().map(str::to_string);
        job.processed_at = Some(at);
    }
}
