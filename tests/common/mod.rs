//! Shared test doubles: an in-memory document store with failure
//! injection, a scripted generator, and a harness wiring the full
//! pipeline over a temporary sled store.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use studyforge::config::{DocStoreConfig, GenerationConfig, RetryConfig, WorkerConfig};
use studyforge::docstore::facade::{GeneratorFacade, StoreFacade};
use studyforge::docstore::{
    Block, DocStore, Properties, PropertyValue, Record,
};
use studyforge::error::ExternalError;
use studyforge::generate::{Completion, GenerationInvoker, TextGenerator};
use studyforge::limiter::{RetryPolicy, TokenBucket};
use studyforge::pipeline::Pipeline;
use studyforge::queue::JobQueue;
use studyforge::store::{SledStateStore, StateStore};
use tempfile::TempDir;

#[derive(Default)]
struct MockState {
    records: HashMap<String, Record>,
    blocks: HashMap<String, Vec<Block>>,
    failures: HashMap<&'static str, VecDeque<ExternalError>>,
    calls: Vec<String>,
    next_id: u64,
}

/// In-memory [`DocStore`] with per-operation failure injection and a
/// call log.
#[derive(Default)]
pub struct MockDocStore {
    state: Mutex<MockState>,
}

impl MockDocStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a page with properties and content blocks.
    pub fn seed_page(&self, id: &str, properties: Properties, blocks: Vec<Block>) {
        let mut state = self.state.lock();
        state.records.insert(
            id.to_string(),
            Record {
                id: id.to_string(),
                created_at: Some(chrono::Utc::now()),
                properties,
            },
        );
        state.blocks.insert(id.to_string(), blocks);
    }

    /// Queue an error for the next call of `op`, FIFO per operation.
    pub fn queue_failure(&self, op: &'static str, error: ExternalError) {
        self.state.lock().failures.entry(op).or_default().push_back(error);
    }

    pub fn record(&self, id: &str) -> Option<Record> {
        self.state.lock().records.get(id).cloned()
    }

    pub fn blocks_of(&self, container_id: &str) -> Vec<Block> {
        self.state
            .lock()
            .blocks
            .get(container_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(op))
            .count()
    }

    fn enter(&self, op: &'static str, target: &str) -> Result<(), ExternalError> {
        let mut state = self.state.lock();
        state.calls.push(format!("{op}:{target}"));
        if let Some(queued) = state.failures.get_mut(op) {
            if let Some(error) = queued.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        format!("{prefix}-{}", state.next_id)
    }
}

#[async_trait]
impl DocStore for MockDocStore {
    async fn get_record(&self, page_id: &str) -> Result<Record, ExternalError> {
        self.enter("get_record", page_id)?;
        self.state
            .lock()
            .records
            .get(page_id)
            .cloned()
            .ok_or_else(|| ExternalError::permanent(404, format!("no page {page_id}")))
    }

    async fn get_blocks(&self, container_id: &str) -> Result<Vec<Block>, ExternalError> {
        self.enter("get_blocks", container_id)?;
        Ok(self.blocks_of(container_id))
    }

    async fn create_page(
        &self,
        parent_id: &str,
        title: &str,
        _icon: Option<&str>,
    ) -> Result<String, ExternalError> {
        self.enter("create_page", parent_id)?;
        let id = self.fresh_id("page");
        let mut properties = Properties::new();
        properties.insert("Name".to_string(), PropertyValue::Title(title.to_string()));
        let mut state = self.state.lock();
        state.records.insert(
            id.clone(),
            Record {
                id: id.clone(),
                created_at: Some(chrono::Utc::now()),
                properties,
            },
        );
        state.blocks.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn create_record(
        &self,
        database_id: &str,
        properties: Properties,
    ) -> Result<String, ExternalError> {
        self.enter("create_record", database_id)?;
        let id = self.fresh_id("rec");
        self.state.lock().records.insert(
            id.clone(),
            Record {
                id: id.clone(),
                created_at: Some(chrono::Utc::now()),
                properties,
            },
        );
        Ok(id)
    }

    async fn update_properties(
        &self,
        page_id: &str,
        properties: Properties,
    ) -> Result<(), ExternalError> {
        self.enter("update_properties", page_id)?;
        let mut state = self.state.lock();
        let record = state
            .records
            .entry(page_id.to_string())
            .or_insert_with(|| Record {
                id: page_id.to_string(),
                created_at: Some(chrono::Utc::now()),
                properties: Properties::new(),
            });
        for (key, value) in properties {
            record.properties.insert(key, value);
        }
        Ok(())
    }

    async fn append_children(
        &self,
        container_id: &str,
        blocks: &[Block],
    ) -> Result<Vec<String>, ExternalError> {
        self.enter("append_children", container_id)?;
        let mut created = Vec::with_capacity(blocks.len());
        let mut state = self.state.lock();
        for block in blocks {
            state.next_id += 1;
            let id = format!("block-{}", state.next_id);
            let mut stored = block.clone();
            stored.id = Some(id.clone());
            state
                .blocks
                .entry(container_id.to_string())
                .or_default()
                .push(stored);
            created.push(id);
        }
        Ok(created)
    }

    async fn list_child_ids(&self, container_id: &str) -> Result<Vec<String>, ExternalError> {
        self.enter("list_child_ids", container_id)?;
        Ok(self
            .blocks_of(container_id)
            .iter()
            .filter_map(|block| block.id.clone())
            .collect())
    }

    async fn delete_block(&self, block_id: &str) -> Result<(), ExternalError> {
        self.enter("delete_block", block_id)?;
        let mut state = self.state.lock();
        for children in state.blocks.values_mut() {
            children.retain(|block| block.id.as_deref() != Some(block_id));
        }
        Ok(())
    }

    async fn query_related(
        &self,
        database_id: &str,
        relation_property: &str,
        target_id: &str,
    ) -> Result<Vec<Record>, ExternalError> {
        self.enter("query_related", database_id)?;
        Ok(self
            .state
            .lock()
            .records
            .values()
            .filter(|record| {
                record
                    .relation(relation_property)
                    .iter()
                    .any(|id| id == target_id)
            })
            .cloned()
            .collect())
    }
}

/// Generator returning a scripted sequence of completions.
#[derive(Default)]
pub struct MockGenerator {
    script: Mutex<VecDeque<Result<Completion, ExternalError>>>,
    calls: Mutex<usize>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, text: &str) {
        self.script.lock().push_back(Ok(Completion {
            text: text.to_string(),
            input_tokens: 100,
            output_tokens: 50,
        }));
    }

    pub fn push_err(&self, error: ExternalError) {
        self.script.lock().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn complete(&self, _system: &str, _user: &str) -> Result<Completion, ExternalError> {
        *self.calls.lock() += 1;
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ExternalError::permanent(400, "script exhausted")))
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        base_delay_ms: 10,
        multiplier: 2.0,
        cap_ms: 500,
        jitter: 0.0,
        max_attempts: 5,
        call_timeout_ms: 5_000,
    }
}

pub fn test_docstore_config() -> DocStoreConfig {
    DocStoreConfig {
        tree_nodes_database_id: Some("db-tree".to_string()),
        knowledge_pages_database_id: Some("db-pages".to_string()),
        retry: fast_retry(),
        ..DocStoreConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<SledStateStore>,
    pub docstore: Arc<MockDocStore>,
    pub generator: Arc<MockGenerator>,
    pub facade: Arc<StoreFacade>,
    pub queue: Arc<JobQueue>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_docstore_config(test_docstore_config())
    }

    pub fn with_docstore_config(docstore_config: DocStoreConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SledStateStore::open(dir.path()).unwrap());
        let docstore = Arc::new(MockDocStore::new());
        let generator = Arc::new(MockGenerator::new());

        let bucket = Arc::new(TokenBucket::new(10_000.0, 10_000.0));
        let retry = RetryPolicy::new(&fast_retry());
        let facade = Arc::new(StoreFacade::new(
            docstore.clone() as Arc<dyn DocStore>,
            Arc::clone(&bucket),
            retry.clone(),
        ));
        let generation = GenerationConfig::default();
        let invoker = GenerationInvoker::new(
            GeneratorFacade::new(
                generator.clone() as Arc<dyn TextGenerator>,
                bucket,
                retry,
            ),
            &generation,
        );
        let pipeline = Arc::new(Pipeline::new(
            store.clone() as Arc<dyn StateStore>,
            Arc::clone(&facade),
            invoker,
            generation,
            docstore_config,
        ));
        let queue = Arc::new(JobQueue::new(
            store.clone() as Arc<dyn StateStore>,
            pipeline,
            &WorkerConfig {
                workers: 2,
                max_job_attempts: 3,
                retry: fast_retry(),
            },
        ));
        Self {
            store,
            docstore,
            generator,
            facade,
            queue,
            _dir: dir,
        }
    }
}

/// Minimal resource page properties: title plus workflow status.
pub fn resource_properties(title: &str, status: &str) -> Properties {
    let mut properties = Properties::new();
    properties.insert("Name".to_string(), PropertyValue::Title(title.to_string()));
    properties.insert(
        "Status".to_string(),
        PropertyValue::Select(status.to_string()),
    );
    properties
}

/// A checklist completion the validator accepts.
pub fn checklist_json() -> String {
    serde_json::json!({
        "title": "Study plan",
        "sections": [{
            "name": "Core",
            "items": [
                { "text": "Skim the chapter", "type": "read", "minutes": 20 },
                { "text": "Summarize key terms", "type": "extract" }
            ]
        }]
    })
    .to_string()
}

/// A tree completion with two linked nodes.
pub fn tree_json() -> String {
    serde_json::json!({
        "title": "Concept map",
        "nodes": [
            { "node_id": "node_root", "name": "Root", "summary": "The big picture." },
            { "node_id": "node_leaf", "parent_id": "node_root",
              "name": "Leaf", "summary": "A detail.", "keywords": ["detail"] }
        ]
    })
    .to_string()
}
