//! Schema-constrained text generation.
//!
//! The raw model endpoint returns free text. [`GenerationInvoker`]
//! layers a contract on top: it asks for JSON matching a per-action
//! schema, parses and validates what comes back, and if validation
//! fails it reprompts once per configured repair attempt with the
//! validation errors inlined. Token usage is accounted even when the
//! contract is never satisfied.

pub mod artifact;
pub mod client;
pub mod prompts;

pub use artifact::GeneratedArtifact;

use crate::config::GenerationConfig;
use crate::docstore::facade::GeneratorFacade;
use crate::error::ExternalError;
use crate::types::ActionType;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// One raw completion from the model endpoint.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Tokens consumed across all attempts of an invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    fn absorb(&mut self, completion: &Completion) {
        self.input += completion.input_tokens;
        self.output += completion.output_tokens;
    }
}

/// Raw model endpoint. Implementations do a single request and report
/// transport-level failures as [`ExternalError`].
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, ExternalError>;
}

/// A validated artifact plus the tokens it cost.
#[derive(Debug)]
pub struct Invocation {
    pub artifact: GeneratedArtifact,
    pub usage: TokenUsage,
}

/// Invocation failure carrying the tokens already spent.
#[derive(Debug)]
pub struct InvokeError {
    pub usage: TokenUsage,
    pub kind: InvokeErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeErrorKind {
    #[error(transparent)]
    External(#[from] ExternalError),
    #[error("output did not satisfy the contract after {attempts} attempts: {}", .errors.join("; "))]
    Contract { attempts: usize, errors: Vec<String> },
}

impl InvokeErrorKind {
    pub fn is_retryable(&self) -> bool {
        match self {
            InvokeErrorKind::External(e) => e.is_retryable(),
            InvokeErrorKind::Contract { .. } => false,
        }
    }
}

pub struct GenerationInvoker {
    facade: GeneratorFacade,
    repair_attempts: usize,
}

impl GenerationInvoker {
    pub fn new(facade: GeneratorFacade, config: &GenerationConfig) -> Self {
        Self {
            facade,
            repair_attempts: config.repair_attempts,
        }
    }

    /// Produce a validated artifact for `action` from `input`, repairing
    /// contract violations by reprompting with the errors.
    pub async fn invoke(
        &self,
        action: ActionType,
        input: &str,
    ) -> Result<Invocation, InvokeError> {
        let system = prompts::system_prompt(action);
        let mut usage = TokenUsage::default();
        let mut user = input.to_string();
        let mut last_errors: Vec<String> = Vec::new();
        let total_attempts = 1 + self.repair_attempts;

        for attempt in 0..total_attempts {
            let completion = match self.facade.complete(&system, &user).await {
                Ok(c) => c,
                Err(e) => {
                    return Err(InvokeError {
                        usage,
                        kind: InvokeErrorKind::External(e),
                    })
                }
            };
            usage.absorb(&completion);

            let errors = match parse_payload(&completion.text) {
                Ok(value) => match GeneratedArtifact::from_json(action, &value) {
                    Ok(artifact) => {
                        let errors = artifact.validate();
                        if errors.is_empty() {
                            debug!(action = %action, attempt, "artifact accepted");
                            return Ok(Invocation { artifact, usage });
                        }
                        errors
                    }
                    Err(e) => vec![e],
                },
                Err(e) => vec![e],
            };

            warn!(
                action = %action,
                attempt,
                errors = errors.len(),
                "generated output violated the contract"
            );
            user = prompts::repair_prompt(input, &completion.text, &errors);
            last_errors = errors;
        }

        Err(InvokeError {
            usage,
            kind: InvokeErrorKind::Contract {
                attempts: total_attempts,
                errors: last_errors,
            },
        })
    }
}

/// Parse model output as JSON, tolerating a fenced code block wrapper.
fn parse_payload(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    let body = if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.strip_suffix("```").unwrap_or(rest);
        rest.trim()
    } else {
        trimmed
    };
    serde_json::from_str(body).map_err(|e| format!("output is not valid JSON: {e}"))
}
