use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{JobOutcome, JobStatus, Match, MatchJob};

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

/// Request to compare a reference image against a video.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    #[garde(length(min = 1, max = 128))]
    #[serde(alias = "referenceImageId")]
    pub reference_artifact_id: String,

    #[garde(length(min = 1, max = 128))]
    #[serde(alias = "videoId")]
    pub target_artifact_id: String,
}

/// Response after submitting a job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deduplicated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status view of a job, shared by the status and wait endpoints.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches: Option<Vec<Match>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusResponse {
    pub fn processing() -> Self {
        Self {
            status: JobStatus::Processing,
            match_count: None,
            matches: None,
            error: None,
        }
    }

    pub fn from_job(job: &MatchJob) -> Self {
        match job.status {
            JobStatus::Completed => Self {
                status: JobStatus::Completed,
                match_count: Some(job.match_count),
                matches: Some(job.matches.clone()),
                error: None,
            },
            JobStatus::Failed => Self {
                status: JobStatus::Failed,
                match_count: None,
                matches: None,
                error: job.error.clone(),
            },
            status => Self {
                status,
                ..Self::processing()
            },
        }
    }

    pub fn from_outcome(outcome: &JobOutcome) -> Self {
        match outcome {
            JobOutcome::Completed { matches } => Self {
                status: JobStatus::Completed,
                match_count: Some(outcome.match_count()),
                matches: Some(matches.clone()),
                error: None,
            },
            JobOutcome::Failed { error } => Self {
                status: JobStatus::Failed,
                match_count: None,
                matches: None,
                error: Some(error.clone()),
            },
        }
    }

    /// Point every match's `frame_url` at this service's frame route. Links
    /// a worker wrote itself refer to the worker's own paths and are replaced.
    pub fn with_frame_urls(mut self, job_id: Uuid) -> Self {
        if let Some(matches) = self.matches.as_mut() {
            for (index, m) in matches.iter_mut().enumerate() {
                m.frame_url = Some(frame_path(job_id, index, m.frame_number));
            }
        }
        self
    }
}

/// Public path of the still frame for one match.
pub fn frame_path(job_id: Uuid, match_index: usize, frame_number: i64) -> String {
    format!("/jobs/{job_id}/frames/{match_index}_{frame_number}")
}

/// Body returned when a frame artifact cannot be located.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderFrame {
    pub placeholder: bool,
    pub frame_id: String,
    pub message: String,
}

impl PlaceholderFrame {
    pub fn new(frame_id: impl Into<String>) -> Self {
        Self {
            placeholder: true,
            frame_id: frame_id.into(),
            message: "Frame image placeholder".to_string(),
        }
    }
}

/// Query parameters for listing jobs.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListJobsQuery {
    pub fn page(&self) -> u32 {
        self.page.filter(|p| *p > 0).unwrap_or(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE)
    }

    /// Rows to skip. Cannot overflow: both factors fit in `u32`.
    pub fn offset(&self) -> i64 {
        i64::from(self.page() - 1) * i64::from(self.limit())
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub results: Vec<MatchJob>,
    pub pagination: Pagination,
}

impl JobListResponse {
    pub fn new(results: Vec<MatchJob>, query: &ListJobsQuery, total: i64) -> Self {
        let limit = query.limit();
        Self {
            results,
            pagination: Pagination {
                page: query.page(),
                limit,
                total,
                pages: (total + i64::from(limit) - 1) / i64::from(limit),
            },
        }
    }
}

/// Liveness of the recognition worker.
#[derive(Debug, Serialize)]
pub struct WorkerStatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
