//! Runtime configuration.
//!
//! Loaded from an optional TOML file with `STUDYFORGE_*` environment
//! overrides, then validated. Every tunable the pipeline consumes lives
//! here so tests can run with deterministic settings (zero jitter, tiny
//! backoff) without touching the environment.

use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudyforgeConfig {
    /// Durable store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// External document store settings
    #[serde(default)]
    pub docstore: DocStoreConfig,

    /// Generation endpoint settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Worker loop settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Trigger boundary settings
    #[serde(default)]
    pub trigger: TriggerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the sled database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocStoreConfig {
    /// API token for the document store
    #[serde(default)]
    pub token: String,

    /// Base URL of the document store API
    #[serde(default = "default_docstore_base_url")]
    pub base_url: String,

    /// Token bucket refill rate (requests per second)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_sec: f64,

    /// Token bucket burst capacity
    #[serde(default = "default_rate_limit")]
    pub burst: f64,

    /// Maximum blocks per append call
    #[serde(default = "default_block_batch_size")]
    pub block_batch_size: usize,

    /// Maximum characters per rich-text segment
    #[serde(default = "default_text_segment_limit")]
    pub text_segment_limit: usize,

    /// Secondary notes database (notes fetch is skipped when unset)
    #[serde(default)]
    pub notes_database_id: Option<String>,

    /// Tree node registry database (node sync is skipped when unset)
    #[serde(default)]
    pub tree_nodes_database_id: Option<String>,

    /// Knowledge page registry database (page sync is skipped when unset)
    #[serde(default)]
    pub knowledge_pages_database_id: Option<String>,

    /// Retry policy for calls crossing the facade
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_docstore_base_url() -> String {
    "https://api.notion.com/v1".to_string()
}

fn default_rate_limit() -> f64 {
    3.0
}

fn default_block_batch_size() -> usize {
    50
}

fn default_text_segment_limit() -> usize {
    2000
}

impl Default for DocStoreConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: default_docstore_base_url(),
            rate_limit_per_sec: default_rate_limit(),
            burst: default_rate_limit(),
            block_batch_size: default_block_batch_size(),
            text_segment_limit: default_text_segment_limit(),
            notes_database_id: None,
            tree_nodes_database_id: None,
            knowledge_pages_database_id: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff settings shared by the facade and the worker loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay before the first retry (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplier applied per additional attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound for a single delay (milliseconds)
    #[serde(default = "default_cap_ms")]
    pub cap_ms: u64,

    /// Jitter fraction in [0, 1]; each delay is scaled by a random factor
    /// in [1 - jitter, 1 + jitter]
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Maximum attempts per call (first try included)
    #[serde(default = "default_max_call_attempts")]
    pub max_attempts: usize,

    /// Bounded timeout per external call (milliseconds)
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_cap_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.1
}

fn default_max_call_attempts() -> usize {
    5
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            cap_ms: default_cap_ms(),
            jitter: default_jitter(),
            max_attempts: default_max_call_attempts(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// API key for the generation endpoint
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the generation endpoint
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum output tokens per call
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Prompt template version recorded on each run
    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,

    /// In-process repair attempts after a contract violation
    #[serde(default = "default_repair_attempts")]
    pub repair_attempts: usize,

    /// Estimated input token ceiling; larger contexts fail fast
    #[serde(default = "default_input_token_ceiling")]
    pub input_token_ceiling: usize,

    /// Blended cost per token (USD) for the dashboard estimate
    #[serde(default = "default_cost_per_token")]
    pub cost_per_token_usd: f64,
}

fn default_generation_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_prompt_version() -> String {
    "v1.1".to_string()
}

fn default_repair_attempts() -> usize {
    2
}

fn default_input_token_ceiling() -> usize {
    100_000
}

fn default_cost_per_token() -> f64 {
    0.000_003
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_generation_base_url(),
            model: default_model(),
            max_output_tokens: default_max_output_tokens(),
            prompt_version: default_prompt_version(),
            repair_attempts: default_repair_attempts(),
            input_token_ceiling: default_input_token_ceiling(),
            cost_per_token_usd: default_cost_per_token(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of logical workers draining the queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum execution attempts per job
    #[serde(default = "default_max_job_attempts")]
    pub max_job_attempts: u32,

    /// Backoff applied between job retry attempts
    #[serde(default = "default_job_retry")]
    pub retry: RetryConfig,
}

fn default_workers() -> usize {
    2
}

fn default_max_job_attempts() -> u32 {
    3
}

fn default_job_retry() -> RetryConfig {
    RetryConfig {
        base_delay_ms: 2000,
        cap_ms: 60_000,
        ..RetryConfig::default()
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_job_attempts: default_max_job_attempts(),
            retry: default_job_retry(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Shared secret required on every trigger request
    #[serde(default)]
    pub shared_secret: String,
}

impl StudyforgeConfig {
    /// Load configuration from an optional TOML file, then apply
    /// `STUDYFORGE_*` environment overrides (`__` separates nesting,
    /// e.g. `STUDYFORGE_WORKER__WORKERS=4`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("STUDYFORGE").separator("__"),
        );
        let loaded: StudyforgeConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Validate cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.docstore.rate_limit_per_sec <= 0.0 {
            return Err(ConfigError::Invalid(
                "docstore.rate_limit_per_sec must be positive".to_string(),
            ));
        }
        if self.docstore.burst < 1.0 {
            return Err(ConfigError::Invalid(
                "docstore.burst must be at least 1".to_string(),
            ));
        }
        if self.docstore.block_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "docstore.block_batch_size must be at least 1".to_string(),
            ));
        }
        if self.worker.workers == 0 {
            return Err(ConfigError::Invalid(
                "worker.workers must be at least 1".to_string(),
            ));
        }
        if self.worker.max_job_attempts == 0 {
            return Err(ConfigError::Invalid(
                "worker.max_job_attempts must be at least 1".to_string(),
            ));
        }
        for (name, retry) in [
            ("docstore.retry", &self.docstore.retry),
            ("worker.retry", &self.worker.retry),
        ] {
            if retry.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}.max_attempts must be at least 1"
                )));
            }
            if !(0.0..=1.0).contains(&retry.jitter) {
                return Err(ConfigError::Invalid(format!(
                    "{name}.jitter must be within [0, 1]"
                )));
            }
            if retry.multiplier < 1.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}.multiplier must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        StudyforgeConfig::default().validate().unwrap();
    }

    #[test]
    fn invalid_rate_limit_rejected() {
        let mut cfg = StudyforgeConfig::default();
        cfg.docstore.rate_limit_per_sec = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn invalid_jitter_rejected() {
        let mut cfg = StudyforgeConfig::default();
        cfg.worker.retry.jitter = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_round_trip_preserves_settings() {
        let mut cfg = StudyforgeConfig::default();
        cfg.worker.workers = 4;
        cfg.docstore.notes_database_id = Some("db-notes".to_string());
        let text = toml::to_string(&cfg).unwrap();
        let back: StudyforgeConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.worker.workers, 4);
        assert_eq!(back.docstore.notes_database_id.as_deref(), Some("db-notes"));
    }
}
