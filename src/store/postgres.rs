use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ArtifactCatalog, JobStore, StoreError};
use crate::db::{self, queries};
use crate::models::artifact::MediaArtifact;
use crate::models::job::{JobOutcome, JobStatus, MatchJob, NewJob};

/// Job store backed by the `match_jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> Result<MatchJob, StoreError> {
        queries::create_job(&self.pool, &job).await
    }

    async fn get(&self, id: Uuid) -> Result<MatchJob, StoreError> {
        queries::get_job(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: JobStatus,
        outcome: &JobOutcome,
    ) -> Result<MatchJob, StoreError> {
        if let Some(job) = queries::transition_job(&self.pool, id, expected, outcome).await? {
            return Ok(job);
        }

        // Nothing matched the guard; report why.
        let current = self.get(id).await?;
        Err(StoreError::Conflict {
            id,
            expected,
            actual: current.status,
        })
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<MatchJob>, i64), StoreError> {
        let jobs = queries::list_jobs_for_owner(&self.pool, owner_id, limit, offset).await?;
        let total = queries::count_jobs_for_owner(&self.pool, owner_id).await?;
        Ok((jobs, total))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(db::ping(&self.pool).await?)
    }
}

/// Artifact catalog backed by the `media_artifacts` table.
#[derive(Clone)]
pub struct PgArtifactCatalog {
    pool: PgPool,
}

impl PgArtifactCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactCatalog for PgArtifactCatalog {
    async fn find(&self, id: &str) -> Result<Option<MediaArtifact>, StoreError> {
        queries::get_artifact(&self.pool, id).await
    }
}
