//! Job execution pipeline.
//!
//! One claimed job flows through: open a run, mark the resource
//! running, fetch and normalize content, generate and validate an
//! artifact, write it back, and only then bump the committed version
//! counter. Every terminal state is persisted on the job and its run;
//! the resource surfaces failures through its stage and error
//! properties.

pub mod approve;
pub mod writer;

pub use writer::ArtifactWriter;

use crate::config::{DocStoreConfig, GenerationConfig};
use crate::docstore::facade::StoreFacade;
use crate::docstore::normalize::{build_prompt_input, normalize_blocks};
use crate::docstore::notes::fetch_notes;
use crate::docstore::{props, Properties, PropertyValue, ResourceMeta};
use crate::error::PipelineError;
use crate::generate::{GenerationInvoker, InvokeErrorKind, TokenUsage};
use crate::queue::{Disposition, JobExecutor};
use crate::store::{Job, Run, RunCompletion, StateStore};
use crate::types::{ActionType, AiStage, JobStatus, ResourceId};
use crate::pipeline::writer::truncate_chars;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

const SNAPSHOT_LIMIT: usize = 10_000;
const ERROR_PROP_LIMIT: usize = 2_000;
/// Rough bytes-per-token divisor for the input ceiling guard.
const BYTES_PER_TOKEN: usize = 4;

struct RunSuccess {
    usage: TokenUsage,
    snapshot: Option<String>,
}

struct RunFailure {
    error: PipelineError,
    usage: TokenUsage,
}

impl From<PipelineError> for RunFailure {
    fn from(error: PipelineError) -> Self {
        Self {
            error,
            usage: TokenUsage::default(),
        }
    }
}

pub struct Pipeline {
    store: Arc<dyn StateStore>,
    facade: Arc<StoreFacade>,
    invoker: GenerationInvoker,
    writer: ArtifactWriter,
    generation: GenerationConfig,
    docstore: DocStoreConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn StateStore>,
        facade: Arc<StoreFacade>,
        invoker: GenerationInvoker,
        generation: GenerationConfig,
        docstore: DocStoreConfig,
    ) -> Self {
        let writer = ArtifactWriter::new(Arc::clone(&facade), Arc::clone(&store), docstore.clone());
        Self {
            store,
            facade,
            invoker,
            writer,
            generation,
            docstore,
        }
    }

    async fn run_generative(&self, job: &Job, run: &Run) -> Result<RunSuccess, RunFailure> {
        let resource_id = &job.resource_id;
        let record = self
            .facade
            .get_record(resource_id.as_str())
            .await
            .map_err(PipelineError::from)?;
        let meta = ResourceMeta::from_record(&record);

        let blocks = self
            .facade
            .get_blocks(resource_id.as_str())
            .await
            .map_err(PipelineError::from)?;
        let content = normalize_blocks(&blocks);
        if content.trim().is_empty() {
            return Err(PipelineError::Validation(
                "resource has no content to process".to_string(),
            )
            .into());
        }

        let notes = fetch_notes(
            &self.facade,
            self.docstore.notes_database_id.as_deref(),
            resource_id.as_str(),
        )
        .await
        .map_err(PipelineError::from)?;

        let input = build_prompt_input(&content, &meta, &notes);
        let estimated_tokens = input.len() / BYTES_PER_TOKEN;
        if estimated_tokens > self.generation.input_token_ceiling {
            return Err(PipelineError::Validation(format!(
                "estimated input of {estimated_tokens} tokens exceeds ceiling of {}",
                self.generation.input_token_ceiling
            ))
            .into());
        }

        let invocation = self
            .invoker
            .invoke(job.action, &input)
            .await
            .map_err(|e| RunFailure {
                error: match e.kind {
                    InvokeErrorKind::External(inner) => PipelineError::External(inner),
                    InvokeErrorKind::Contract { attempts, errors } => {
                        PipelineError::SchemaValidation { attempts, errors }
                    }
                },
                usage: TokenUsage {
                    input: e.usage.input,
                    output: e.usage.output,
                },
            })?;
        let usage = invocation.usage;

        // the version this rendition will carry once committed
        let versions = self
            .store
            .versions(resource_id)
            .map_err(PipelineError::from)
            .map_err(|e| RunFailure { error: e, usage })?;
        let version = versions.get(&job.action).copied().unwrap_or(0) + 1;

        self.writer
            .write_back(resource_id, job.action, &invocation.artifact, version, run.id)
            .await
            .map_err(|e| RunFailure { error: e, usage })?;

        // counter bump is the commit point, after write-back succeeded
        self.store
            .next_version(resource_id, job.action)
            .map_err(PipelineError::from)
            .map_err(|e| RunFailure { error: e, usage })?;

        let snapshot = serde_json::to_string(&invocation.artifact).ok().map(|mut s| {
            truncate_chars(&mut s, SNAPSHOT_LIMIT);
            s
        });
        Ok(RunSuccess { usage, snapshot })
    }

    async fn run_job(&self, job: &Job, run: &Run) -> Result<RunSuccess, RunFailure> {
        match job.action {
            ActionType::Approve => {
                approve::run_cascade(&self.store, &self.facade, &job.resource_id, run.id).await?;
                Ok(RunSuccess {
                    usage: TokenUsage::default(),
                    snapshot: None,
                })
            }
            _ => self.run_generative(job, run).await,
        }
    }

    async fn mark_stage(&self, resource_id: &ResourceId, stage: AiStage) {
        let mut properties = Properties::new();
        properties.insert(
            props::AI_STAGE.to_string(),
            PropertyValue::Select(stage.as_str().to_string()),
        );
        if let Err(e) = self
            .facade
            .update_properties(resource_id.as_str(), properties)
            .await
        {
            warn!(resource_id = %resource_id, stage = %stage, error = %e, "stage update failed");
        }
    }

    async fn write_failure_props(&self, resource_id: &ResourceId, message: &str) {
        let mut truncated = message.to_string();
        truncate_chars(&mut truncated, ERROR_PROP_LIMIT);
        let mut properties = Properties::new();
        properties.insert(
            props::AI_STAGE.to_string(),
            PropertyValue::Select(AiStage::Failed.as_str().to_string()),
        );
        properties.insert(props::ERROR.to_string(), PropertyValue::Text(truncated));
        if let Err(e) = self
            .facade
            .update_properties(resource_id.as_str(), properties)
            .await
        {
            warn!(resource_id = %resource_id, error = %e, "failure write-back failed");
        }
    }

    fn persist_job(&self, job: &Job) {
        if let Err(e) = self.store.put_job(job) {
            error!(job_id = %job.id, error = %e, "job state write failed");
        }
    }

    fn close_run(&self, run: &Run, completion: RunCompletion) {
        if let Err(e) = self.store.finish_run(&run.id, completion) {
            error!(run_id = %run.id, error = %e, "run close failed");
        }
    }
}

#[async_trait]
impl JobExecutor for Pipeline {
    async fn execute(&self, job: &Job) -> Disposition {
        let mut job = job.clone();
        job.attempts += 1;
        job.status = JobStatus::Running;
        job.updated_at = Utc::now();
        self.persist_job(&job);

        let run = Run::begin(&job, &self.generation.model, &self.generation.prompt_version);
        if let Err(e) = self.store.append_run(&run) {
            error!(job_id = %job.id, error = %e, "run open failed");
            job.status = JobStatus::Failed;
            job.error = Some(e.to_string());
            self.persist_job(&job);
            return Disposition::Failed {
                error: e.to_string(),
            };
        }
        self.mark_stage(&job.resource_id, AiStage::Running).await;

        match self.run_job(&job, &run).await {
            Ok(success) => {
                self.close_run(
                    &run,
                    RunCompletion {
                        status: JobStatus::Success,
                        input_tokens: success.usage.input,
                        output_tokens: success.usage.output,
                        error: None,
                        output_snapshot: success.snapshot,
                    },
                );
                job.status = JobStatus::Success;
                job.error = None;
                job.updated_at = Utc::now();
                self.persist_job(&job);
                info!(job_id = %job.id, action = %job.action, "job complete");
                Disposition::Success
            }
            Err(failure) => {
                let message = failure.error.to_string();
                self.close_run(
                    &run,
                    RunCompletion {
                        status: JobStatus::Failed,
                        input_tokens: failure.usage.input,
                        output_tokens: failure.usage.output,
                        error: Some(message.clone()),
                        output_snapshot: None,
                    },
                );
                let retryable = failure.error.is_retryable();
                if retryable && job.attempts < job.max_attempts {
                    job.status = JobStatus::Queued;
                    job.error = Some(message.clone());
                    job.updated_at = Utc::now();
                    self.persist_job(&job);
                    Disposition::Retry { error: message }
                } else {
                    job.status = JobStatus::Failed;
                    job.error = Some(message.clone());
                    job.updated_at = Utc::now();
                    self.persist_job(&job);
                    self.write_failure_props(&job.resource_id, &message).await;
                    Disposition::Failed { error: message }
                }
            }
        }
    }
}
