//! External hierarchical document store.
//!
//! `DocStore` is the trait boundary for the foreign store; everything the
//! pipeline sends outward goes through the rate-limited facade in
//! [`facade`]. The store is consumed purely at this interface so tests
//! drive the full pipeline against an in-memory implementation.

use crate::error::ExternalError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod block;
pub mod facade;
pub mod http;
pub mod normalize;
pub mod notes;
pub mod render;

pub use block::{Block, BlockKind, RichText};

/// Well-known resource property names.
pub mod props {
    pub const AI_STAGE: &str = "AI Stage";
    pub const STATUS: &str = "Status";
    pub const ERROR: &str = "Error";
    pub const RUN_ID: &str = "Run ID";
    pub const NAME: &str = "Name";
    pub const PARENT: &str = "Parent";
    pub const SCOPE: &str = "Scope";
}

/// Typed property value, mirroring what the store's API accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Title(String),
    Text(String),
    Select(String),
    MultiSelect(Vec<String>),
    Number(f64),
    Relation(Vec<String>),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Title(s) | PropertyValue::Text(s) | PropertyValue::Select(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered property map (deterministic iteration keeps prompts and
/// serialized payloads stable).
pub type Properties = BTreeMap<String, PropertyValue>;

/// A page or database row as returned by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub properties: Properties,
}

impl Record {
    pub fn title(&self) -> Option<&str> {
        match self.properties.get(props::NAME) {
            Some(PropertyValue::Title(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn select(&self, key: &str) -> Option<&str> {
        match self.properties.get(key) {
            Some(PropertyValue::Select(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.properties.get(key) {
            Some(PropertyValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn multi_select(&self, key: &str) -> Vec<String> {
        match self.properties.get(key) {
            Some(PropertyValue::MultiSelect(v)) => v.clone(),
            _ => Vec::new(),
        }
    }

    pub fn relation(&self, key: &str) -> Vec<String> {
        match self.properties.get(key) {
            Some(PropertyValue::Relation(v)) => v.clone(),
            _ => Vec::new(),
        }
    }
}

/// Metadata extracted from a resource page, included in the prompt header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceMeta {
    pub title: String,
    pub status: Option<String>,
    pub source_name: Option<String>,
    pub source_kind: Option<String>,
    pub source_url: Option<String>,
    pub source_citation: Option<String>,
}

impl ResourceMeta {
    pub fn from_record(record: &Record) -> Self {
        Self {
            title: record.title().unwrap_or_default().to_string(),
            status: record.select(props::STATUS).map(str::to_string),
            source_name: record.text("Source Name").map(str::to_string),
            source_kind: record.select("Source Type").map(str::to_string),
            source_url: record.text("Source URL").map(str::to_string),
            source_citation: record.text("Source Citation").map(str::to_string),
        }
    }
}

/// Trait boundary for the external hierarchical document store.
///
/// Implementations report raw [`ExternalError`]s and do no retrying of
/// their own: rate limiting, retry, and timeouts all live in the facade.
#[async_trait]
pub trait DocStore: Send + Sync {
    /// Fetch one page/row with its properties.
    async fn get_record(&self, page_id: &str) -> Result<Record, ExternalError>;

    /// Fetch the full block tree under a container.
    async fn get_blocks(&self, container_id: &str) -> Result<Vec<Block>, ExternalError>;

    /// Create a child page under a parent page. Returns the new page id.
    async fn create_page(
        &self,
        parent_id: &str,
        title: &str,
        icon: Option<&str>,
    ) -> Result<String, ExternalError>;

    /// Create a row in a database. Returns the new row id.
    async fn create_record(
        &self,
        database_id: &str,
        properties: Properties,
    ) -> Result<String, ExternalError>;

    /// Update properties on a page or row.
    async fn update_properties(
        &self,
        page_id: &str,
        properties: Properties,
    ) -> Result<(), ExternalError>;

    /// Append child blocks to a container, preserving order.
    /// Returns the created block ids.
    async fn append_children(
        &self,
        container_id: &str,
        blocks: &[Block],
    ) -> Result<Vec<String>, ExternalError>;

    /// List the ids of a container's direct children.
    async fn list_child_ids(&self, container_id: &str) -> Result<Vec<String>, ExternalError>;

    /// Delete one block (and its subtree).
    async fn delete_block(&self, block_id: &str) -> Result<(), ExternalError>;

    /// Query database rows whose `relation_property` contains `target_id`,
    /// ordered by creation time.
    async fn query_related(
        &self,
        database_id: &str,
        relation_property: &str,
        target_id: &str,
    ) -> Result<Vec<Record>, ExternalError>;
}
