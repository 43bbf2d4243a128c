//! Core identifiers and enums shared across the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The five fixed processing kinds. Adding a sixth is a deliberate,
/// checked extension: every dispatch site matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Checklist,
    Tree,
    Pages,
    Flashcards,
    Approve,
}

impl ActionType {
    pub const ALL: [ActionType; 5] = [
        ActionType::Checklist,
        ActionType::Tree,
        ActionType::Pages,
        ActionType::Flashcards,
        ActionType::Approve,
    ];

    /// The four kinds that run the generation pipeline (everything but approve).
    pub const GENERATIVE: [ActionType; 4] = [
        ActionType::Checklist,
        ActionType::Tree,
        ActionType::Pages,
        ActionType::Flashcards,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Checklist => "checklist",
            ActionType::Tree => "tree",
            ActionType::Pages => "pages",
            ActionType::Flashcards => "flashcards",
            ActionType::Approve => "approve",
        }
    }

    pub fn parse(s: &str) -> Option<ActionType> {
        match s {
            "checklist" => Some(ActionType::Checklist),
            "tree" => Some(ActionType::Tree),
            "pages" => Some(ActionType::Pages),
            "flashcards" => Some(ActionType::Flashcards),
            "approve" => Some(ActionType::Approve),
            _ => None,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state shared by jobs and runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource-level AI processing stage, written back to the document store
/// as a select property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiStage {
    Idle,
    Queued,
    Running,
    NeedsReview,
    Approved,
    Failed,
}

impl AiStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiStage::Idle => "Idle",
            AiStage::Queued => "Queued",
            AiStage::Running => "Running",
            AiStage::NeedsReview => "Needs review",
            AiStage::Approved => "Approved",
            AiStage::Failed => "Failed",
        }
    }
}

impl fmt::Display for AiStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-artifact approval state. Draft surfaces as "Needs review" in the
/// external store; Archived artifacts are invisible to the approve cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Draft,
    Approved,
    Archived,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Draft => "Draft",
            ApprovalStatus::Approved => "Approved",
            ApprovalStatus::Archived => "Archived",
        }
    }
}

/// Resource workflow ladder. The approve cascade advances a resource one
/// step along this ladder, saturating at the last stage.
pub const WORKFLOW_LADDER: [&str; 4] = ["Captured", "Reading", "Synthesizing", "Integrated"];

/// Next workflow stage after `current`. Unknown or missing stages restart
/// the ladder at its second step so a cascade always makes visible progress.
pub fn advance_workflow(current: Option<&str>) -> &'static str {
    match current.and_then(|c| WORKFLOW_LADDER.iter().position(|s| *s == c)) {
        Some(idx) => WORKFLOW_LADDER[(idx + 1).min(WORKFLOW_LADDER.len() - 1)],
        None => WORKFLOW_LADDER[1],
    }
}

/// Identifier of the primary tracked item anchoring actions and artifacts.
///
/// Kept deliberately permissive (external ids are opaque), but bounded and
/// printable so malformed trigger input is rejected before any enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    pub const MAX_LEN: usize = 64;

    pub fn parse(s: &str) -> Result<ResourceId, String> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("resource id is empty".to_string());
        }
        if trimmed.len() > Self::MAX_LEN {
            return Err(format!("resource id exceeds {} characters", Self::MAX_LEN));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err("resource id contains invalid characters".to_string());
        }
        Ok(ResourceId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok($name(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(JobId);
uuid_id!(RunId);
