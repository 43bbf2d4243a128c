//! Trigger boundary and read-side views.
//!
//! [`Service`] is the surface an HTTP layer or automation hook calls
//! into. Trigger validation is synchronous: the caller learns about a
//! bad secret, unknown action, or malformed resource id immediately,
//! and once a job id is returned the job is already durable.

use crate::docstore::facade::StoreFacade;
use crate::docstore::{props, Properties, PropertyValue};
use crate::error::{StorageError, TriggerError};
use crate::queue::JobQueue;
use crate::stats::{aggregate, recent_runs, RunSummary, StatsReport};
use crate::store::{Job, Run, StateStore};
use crate::types::{ActionType, AiStage, JobId, JobStatus, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("job {0} is not in a retryable state")]
    NotRetryable(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerRequest {
    pub resource_id: String,
    pub action_type: String,
    pub secret: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerAccepted {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub resource_id: String,
    pub action: String,
    pub status: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub runs: Vec<RunSummary>,
}

pub struct Service {
    queue: Arc<JobQueue>,
    store: Arc<dyn StateStore>,
    facade: Arc<StoreFacade>,
    shared_secret: String,
    cost_per_token_usd: f64,
}

impl Service {
    pub fn new(
        queue: Arc<JobQueue>,
        store: Arc<dyn StateStore>,
        facade: Arc<StoreFacade>,
        shared_secret: String,
        cost_per_token_usd: f64,
    ) -> Self {
        Self {
            queue,
            store,
            facade,
            shared_secret,
            cost_per_token_usd,
        }
    }

    /// Validate a trigger and enqueue its job. Validation failures
    /// never create a job; a returned job id is already durable.
    pub async fn handle_trigger(
        &self,
        request: TriggerRequest,
    ) -> Result<TriggerAccepted, ApiError> {
        if request.secret != self.shared_secret {
            return Err(TriggerError::InvalidSecret.into());
        }
        let action = ActionType::parse(&request.action_type)
            .ok_or_else(|| TriggerError::UnknownAction(request.action_type.clone()))?;
        let resource_id = ResourceId::parse(&request.resource_id)
            .map_err(TriggerError::MalformedResourceId)?;

        let job = self.queue.enqueue(resource_id.clone(), action)?;
        info!(
            job_id = %job.id,
            resource_id = %resource_id,
            action = %action,
            requested_by = request.requested_by.as_deref().unwrap_or("unknown"),
            "trigger accepted"
        );

        // visible feedback on the resource; the job proceeds regardless
        let mut properties = Properties::new();
        properties.insert(
            props::AI_STAGE.to_string(),
            PropertyValue::Select(AiStage::Queued.as_str().to_string()),
        );
        if let Err(e) = self
            .facade
            .update_properties(resource_id.as_str(), properties)
            .await
        {
            warn!(resource_id = %resource_id, error = %e, "queued stage stamp failed");
        }

        Ok(TriggerAccepted {
            job_id: job.id.to_string(),
            status: job.status.as_str().to_string(),
        })
    }

    pub fn job_status(&self, id: &JobId) -> Result<JobView, ApiError> {
        let job = self.store.get_job(id)?;
        let runs: Vec<Run> = self
            .store
            .runs()?
            .into_iter()
            .filter(|run| run.job_id == job.id)
            .collect();
        Ok(JobView {
            job_id: job.id.to_string(),
            resource_id: job.resource_id.to_string(),
            action: job.action.as_str().to_string(),
            status: job.status.as_str().to_string(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
            runs: recent_runs(&runs, runs.len()),
        })
    }

    /// Committed versions per generative action for a resource.
    pub fn versions(&self, resource_id: &ResourceId) -> Result<BTreeMap<ActionType, u64>, ApiError> {
        Ok(self.store.versions(resource_id)?)
    }

    pub fn stats(&self) -> Result<StatsReport, ApiError> {
        let jobs = self.store.jobs()?;
        let runs = self.store.runs()?;
        Ok(aggregate(&jobs, &runs, self.cost_per_token_usd))
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<RunSummary>, ApiError> {
        Ok(recent_runs(&self.store.runs()?, limit))
    }

    /// Give a terminally failed job a fresh attempt budget and requeue it.
    pub fn retry_failed(&self, id: &JobId) -> Result<Job, ApiError> {
        let mut job = self.store.get_job(id)?;
        if job.status != JobStatus::Failed {
            return Err(ApiError::NotRetryable(id.to_string()));
        }
        job.status = JobStatus::Queued;
        job.attempts = 0;
        job.error = None;
        job.not_before = None;
        job.updated_at = Utc::now();
        self.queue.resubmit(&job)?;
        info!(job_id = %job.id, "failed job resubmitted");
        Ok(job)
    }
}
