//! Error types for the studyforge generation pipeline.

use std::time::Duration;
use thiserror::Error;

/// Storage-related errors (sled-backed ledger)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run {0} is already terminal")]
    RunAlreadyTerminal(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
}

/// Synchronous trigger-boundary rejections. These are the only errors that
/// surface to the caller before a job exists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("invalid shared secret")]
    InvalidSecret,

    #[error("unknown action type: {0}")]
    UnknownAction(String),

    #[error("malformed resource id: {0}")]
    MalformedResourceId(String),
}

/// Outcome classification for calls that crossed the client facade.
#[derive(Debug, Error, Clone)]
pub enum ExternalError {
    /// Network failures, 5xx and 429 responses. Retried by the facade.
    #[error("transient external failure (status {status:?}): {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// Non-429 4xx responses (permissions, deleted targets). Never retried.
    #[error("permanent external failure (status {status}): {message}")]
    Permanent { status: u16, message: String },

    /// Bounded per-call timeout exceeded. Treated as transient.
    #[error("external call timed out after {0:?}")]
    Timeout(Duration),
}

impl ExternalError {
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        ExternalError::Transient {
            status,
            message: message.into(),
        }
    }

    pub fn permanent(status: u16, message: impl Into<String>) -> Self {
        ExternalError::Permanent {
            status,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExternalError::Transient { .. } | ExternalError::Timeout(_)
        )
    }
}

/// Errors produced while executing one job's pipeline. The queue uses
/// `is_retryable` to decide between backoff re-queue and terminal failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Content preconditions (empty context, oversized input, cyclic tree).
    /// Never retried: re-running cannot fix the input.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    External(#[from] ExternalError),

    /// Generated output still violates its contract after bounded repair.
    /// Retryable at the job level: a fresh run may produce valid output.
    #[error("generated output failed contract after {attempts} attempt(s): {}", .errors.join("; "))]
    SchemaValidation {
        attempts: usize,
        errors: Vec<String>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A subset of cascade updates was applied before a child failed.
    /// Applied effects persist; the error enumerates what is left so a
    /// retry can converge.
    #[error("cascade partially applied: {applied} updated, {} remaining: {}", .remaining.len(), .remaining.join(", "))]
    PartialCascade {
        applied: usize,
        remaining: Vec<String>,
        retryable: bool,
    },
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Validation(_) => false,
            PipelineError::External(e) => e.is_retryable(),
            PipelineError::SchemaValidation { .. } => true,
            PipelineError::Storage(_) => false,
            PipelineError::PartialCascade { retryable, .. } => *retryable,
        }
    }
}

/// Configuration load/validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Invalid(String),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}
