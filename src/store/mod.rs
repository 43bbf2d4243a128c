//! Durable pipeline state.
//!
//! Everything the pipeline must not lose across a restart lives behind
//! [`StateStore`]: jobs and the pending FIFO, run history, per-resource
//! version counters, container references for idempotent write-back,
//! and the artifact registry the approve cascade walks.

pub mod persistence;

pub use persistence::SledStateStore;

use crate::error::StorageError;
use crate::types::{ActionType, ApprovalStatus, JobId, JobStatus, ResourceId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A queued unit of work. `attempts` counts executions started, not
/// enqueues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub resource_id: ResourceId,
    pub action: ActionType,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub error: Option<String>,
    /// Earliest time a worker may claim the job again; set while the
    /// job sits out a retry backoff, cleared on the next execution.
    pub not_before: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(resource_id: ResourceId, action: ActionType, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            resource_id,
            action,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts,
            error: None,
            not_before: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One execution attempt of a job, with its token accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub job_id: JobId,
    pub resource_id: ResourceId,
    pub action: ActionType,
    pub status: JobStatus,
    pub model: String,
    pub prompt_version: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Truncated JSON snapshot of the accepted artifact.
    pub output_snapshot: Option<String>,
}

impl Run {
    pub fn begin(job: &Job, model: &str, prompt_version: &str) -> Self {
        Self {
            id: RunId::new(),
            job_id: job.id,
            resource_id: job.resource_id.clone(),
            action: job.action,
            status: JobStatus::Running,
            model: model.to_string(),
            prompt_version: prompt_version.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            output_snapshot: None,
        }
    }
}

/// Terminal outcome applied to an open run.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub status: JobStatus,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub error: Option<String>,
    pub output_snapshot: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    TreeNode,
    KnowledgePage,
}

/// A secondary-database row created during write-back, tracked locally
/// so the approve cascade knows what to flip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub resource_id: ResourceId,
    /// Stable handle within the artifact (node id or page title slug).
    pub artifact_id: String,
    /// Row id in the external store.
    pub external_id: String,
    pub kind: ArtifactKind,
    pub status: ApprovalStatus,
}

/// Synchronous durable store. Callers on async paths keep operations
/// short; sled writes are cheap enough to run inline.
pub trait StateStore: Send + Sync {
    fn put_job(&self, job: &Job) -> Result<(), StorageError>;
    fn get_job(&self, id: &JobId) -> Result<Job, StorageError>;
    fn jobs(&self) -> Result<Vec<Job>, StorageError>;
    fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>, StorageError>;

    /// Append a job to the pending FIFO. Re-pushing a job that is
    /// already pending returns its existing position.
    fn push_pending(&self, id: &JobId) -> Result<u64, StorageError>;
    /// Pending entries in FIFO order.
    fn pending(&self) -> Result<Vec<(u64, JobId)>, StorageError>;
    fn remove_pending(&self, seq: u64) -> Result<(), StorageError>;

    fn append_run(&self, run: &Run) -> Result<(), StorageError>;
    fn get_run(&self, id: &RunId) -> Result<Run, StorageError>;
    /// Close an open run. Closing an already-terminal run is an error.
    fn finish_run(&self, id: &RunId, completion: RunCompletion) -> Result<Run, StorageError>;
    fn runs(&self) -> Result<Vec<Run>, StorageError>;

    /// Increment and return the committed version counter. Called only
    /// after write-back succeeds.
    fn next_version(&self, resource: &ResourceId, action: ActionType) -> Result<u64, StorageError>;
    /// Committed versions per generative action, zero when never run.
    fn versions(&self, resource: &ResourceId) -> Result<BTreeMap<ActionType, u64>, StorageError>;

    fn container_ref(
        &self,
        resource: &ResourceId,
        action: ActionType,
    ) -> Result<Option<String>, StorageError>;
    fn set_container_ref(
        &self,
        resource: &ResourceId,
        action: ActionType,
        container_id: &str,
    ) -> Result<(), StorageError>;

    fn upsert_artifact(&self, record: &ArtifactRecord) -> Result<(), StorageError>;
    fn artifacts_for(&self, resource: &ResourceId) -> Result<Vec<ArtifactRecord>, StorageError>;
    fn set_artifact_status(
        &self,
        resource: &ResourceId,
        artifact_id: &str,
        status: ApprovalStatus,
    ) -> Result<(), StorageError>;
}
