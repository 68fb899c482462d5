//! Persistence seams for match jobs and the media artifacts they reference.
//!
//! Both stores are traits so the server can run against Postgres in
//! production and against the in-memory implementations in tests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::artifact::MediaArtifact;
use crate::models::job::{JobOutcome, JobStatus, MatchJob, NewJob};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryArtifactCatalog, MemoryJobStore};
pub use postgres::{PgArtifactCatalog, PgJobStore};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> Result<MatchJob, StoreError>;

    async fn get(&self, id: Uuid) -> Result<MatchJob, StoreError>;

    /// Apply `outcome` only if the job is currently in `expected` status.
    ///
    /// Returns [`StoreError::Conflict`] when the job has already moved on, so
    /// a duplicate completion signal never overwrites a terminal job.
    async fn transition(
        &self,
        id: Uuid,
        expected: JobStatus,
        outcome: &JobOutcome,
    ) -> Result<MatchJob, StoreError>;

    /// Jobs owned by `owner_id`, newest first, plus the owner's total count.
    async fn list_by_owner(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<MatchJob>, i64), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Read-only view of the artifact storage collaborator.
#[async_trait]
pub trait ArtifactCatalog: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<MediaArtifact>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {id} is {actual}, expected {expected}")]
    Conflict {
        id: Uuid,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Decode(String),
}
