//! Job store trait and the in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use bloodwork_core::{Job, JobId};

/// Durable mapping from job identifier to job state.
///
/// All writes commit before the call returns: a `get` immediately following
/// a `create` on the same process sees the record. Each record has exactly
/// one writer sequence (create, then at most one terminal update), so the
/// store only needs to tolerate concurrent writers on *distinct* ids.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a freshly created record.
    async fn create(&self, job: Job) -> Result<(), JobStoreError>;

    /// Fetch a record by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Transition to `Completed` and write the result document. The single
    /// durability point of the pipeline: once this lands, the job is
    /// permanently terminal regardless of further broker redelivery.
    async fn mark_completed(&self, id: JobId, result: JsonValue) -> Result<(), JobStoreError>;

    /// Transition to `Failed` with a reason.
    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<(), JobStoreError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Identifier collision. Should not happen given UUIDv7 generation, but
    /// checked defensively.
    #[error("duplicate job id: {0}")]
    DuplicateId(JobId),

    /// Rejected terminal-state overwrite (monotonic status).
    #[error("job {0} is already terminal")]
    TerminalState(JobId),

    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for dev/tests.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::DuplicateId(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn mark_completed(&self, id: JobId, result: JsonValue) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if !job.mark_completed(result) {
            return Err(JobStoreError::TerminalState(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if !job.mark_failed(reason) {
            return Err(JobStoreError::TerminalState(id));
        }
        Ok(())
    }
}
