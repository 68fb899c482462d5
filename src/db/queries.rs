use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::artifact::{MediaArtifact, MediaKind};
use crate::models::job::{JobOutcome, JobStatus, Match, MatchJob, NewJob};
use crate::store::StoreError;

const JOB_COLUMNS: &str = "id, owner_id, reference_artifact_id, target_artifact_id, status, \
     match_count, matches, error, worker_task_id, created_at, processed_at";

fn job_from_row(row: &PgRow) -> Result<MatchJob, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|_| StoreError::Decode(format!("unknown job status '{status_str}'")))?;
    let matches: Json<Vec<Match>> = row.try_get("matches")?;

    Ok(MatchJob {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        reference_artifact_id: row.try_get("reference_artifact_id")?,
        target_artifact_id: row.try_get("target_artifact_id")?,
        status,
        match_count: row.try_get("match_count")?,
        matches: matches.0,
        error: row.try_get("error")?,
        worker_task_id: row.try_get("worker_task_id")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

/// Insert a new match job
pub async fn create_job(pool: &PgPool, job: &NewJob) -> Result<MatchJob, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO match_jobs (id, owner_id, reference_artifact_id, target_artifact_id, status, worker_task_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job.id)
    .bind(&job.owner_id)
    .bind(&job.reference_artifact_id)
    .bind(&job.target_artifact_id)
    .bind(job.status.as_ref())
    .bind(job.worker_task_id.as_deref())
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<MatchJob>, StoreError> {
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM match_jobs WHERE id = $1"))
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Conditionally move a job to its terminal state.
///
/// Returns `None` when no row matched, either because the job does not exist
/// or because its status is no longer `expected`.
pub async fn transition_job(
    pool: &PgPool,
    job_id: Uuid,
    expected: JobStatus,
    outcome: &JobOutcome,
) -> Result<Option<MatchJob>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE match_jobs
        SET status = $3,
            match_count = $4,
            matches = $5,
            error = $6,
            processed_at = NOW()
        WHERE id = $1 AND status = $2
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(expected.as_ref())
    .bind(outcome.status().as_ref())
    .bind(outcome.match_count())
    .bind(Json(outcome.matches()))
    .bind(outcome.error())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Page of jobs for an owner, newest first
pub async fn list_jobs_for_owner(
    pool: &PgPool,
    owner_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<MatchJob>, StoreError> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM match_jobs
        WHERE owner_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(owner_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Count jobs for an owner
pub async fn count_jobs_for_owner(pool: &PgPool, owner_id: &str) -> Result<i64, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM match_jobs WHERE owner_id = $1")
        .bind(owner_id)
        .fetch_one(pool)
        .await?;

    Ok(row.try_get("total")?)
}

/// Look up a media artifact
pub async fn get_artifact(
    pool: &PgPool,
    artifact_id: &str,
) -> Result<Option<MediaArtifact>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, owner_id, kind, locator, title
        FROM media_artifacts
        WHERE id = $1
        "#,
    )
    .bind(artifact_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| -> Result<MediaArtifact, StoreError> {
        let kind_str: String = r.try_get("kind")?;
        let kind = MediaKind::from_str(&kind_str)
            .map_err(|_| StoreError::Decode(format!("unknown media kind '{kind_str}'")))?;

        Ok(MediaArtifact {
            id: r.try_get("id")?,
            owner_id: r.try_get("owner_id")?,
            kind,
            locator: r.try_get("locator")?,
            title: r.try_get("title")?,
        })
    })
    .transpose()
}
