use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ArtifactCatalog, JobStore, StoreError};
use crate::models::artifact::MediaArtifact;
use crate::models::job::{JobOutcome, JobStatus, MatchJob, NewJob};

/// Job store kept in process memory. Used when no database is configured.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, MatchJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<MatchJob, StoreError> {
        let record = MatchJob {
            id: job.id,
            owner_id: job.owner_id,
            reference_artifact_id: job.reference_artifact_id,
            target_artifact_id: job.target_artifact_id,
            status: job.status,
            match_count: 0,
            matches: Vec::new(),
            error: None,
            worker_task_id: job.worker_task_id,
            created_at: Utc::now(),
            processed_at: None,
        };
        self.jobs.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<MatchJob, StoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: JobStatus,
        outcome: &JobOutcome,
    ) -> Result<MatchJob, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if job.status != expected || !job.status.can_transition_to(outcome.status()) {
            return Err(StoreError::Conflict {
                id,
                expected,
                actual: job.status,
            });
        }

        outcome.apply_to(job, Utc::now());
        Ok(job.clone())
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<MatchJob>, i64), StoreError> {
        let jobs = self.jobs.read().await;
        let mut owned: Vec<&MatchJob> = jobs.values().filter(|j| j.owner_id == owner_id).collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = owned.len() as i64;
        let page = owned
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Artifact catalog kept in process memory.
#[derive(Default)]
pub struct MemoryArtifactCatalog {
    artifacts: RwLock<HashMap<String, MediaArtifact>>,
}

impl MemoryArtifactCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, artifact: MediaArtifact) {
        self.artifacts
            .write()
            .await
            .insert(artifact.id.clone(), artifact);
    }
}

#[async_trait]
impl ArtifactCatalog for MemoryArtifactCatalog {
    async fn find(&self, id: &str) -> Result<Option<MediaArtifact>, StoreError> {
        Ok(self.artifacts.read().await.get(id).cloned())
    }
}
