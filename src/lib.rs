//! Studyforge: a durable generation pipeline for hierarchical study
//! material.
//!
//! An external trigger enqueues a job against a tracked resource. A
//! worker drains the durable queue, pulls the resource's content from
//! the document store, asks the generation endpoint for a
//! schema-constrained artifact (checklist, concept tree, study pages,
//! or flashcards), validates it, and writes it back as a versioned
//! page. A separate approve action cascades review approval across the
//! artifacts a resource produced.

pub mod api;
pub mod config;
pub mod docstore;
pub mod error;
pub mod generate;
pub mod limiter;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod stats;
pub mod store;
pub mod types;
