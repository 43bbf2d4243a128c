//! Artifact write-back.
//!
//! Re-runs overwrite: the container page for a (resource, action) pair
//! is reused when one is on record, its children are cleared, and the
//! new rendition is appended in batches. Secondary registries (tree
//! nodes, knowledge pages) are synced afterwards, with prior rows
//! archived so the approve cascade only sees the latest rendition.

use crate::config::DocStoreConfig;
use crate::docstore::block::enforce_segment_limit;
use crate::docstore::facade::StoreFacade;
use crate::docstore::render;
use crate::docstore::{props, Block, Properties, PropertyValue};
use crate::error::PipelineError;
use crate::generate::artifact::{PagesArtifact, TreeArtifact};
use crate::generate::GeneratedArtifact;
use crate::store::{ArtifactKind, ArtifactRecord, StateStore};
use crate::types::{ActionType, AiStage, ApprovalStatus, ResourceId, RunId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn action_icon(action: ActionType) -> &'static str {
    match action {
        ActionType::Checklist => "✅",
        ActionType::Tree => "🌳",
        ActionType::Pages => "📚",
        ActionType::Flashcards => "🎴",
        ActionType::Approve => "✔️",
    }
}

fn action_label(action: ActionType) -> &'static str {
    match action {
        ActionType::Checklist => "Checklist",
        ActionType::Tree => "Tree",
        ActionType::Pages => "Pages",
        ActionType::Flashcards => "Flashcards",
        ActionType::Approve => "Approve",
    }
}

/// Stable registry handle derived from a title.
fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_sep = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = slug.trim_end_matches('_');
    format!("page_{trimmed}")
}

pub struct ArtifactWriter {
    facade: Arc<StoreFacade>,
    store: Arc<dyn StateStore>,
    config: DocStoreConfig,
}

impl ArtifactWriter {
    pub fn new(
        facade: Arc<StoreFacade>,
        store: Arc<dyn StateStore>,
        config: DocStoreConfig,
    ) -> Self {
        Self {
            facade,
            store,
            config,
        }
    }

    /// Write an artifact under the resource and stamp review properties.
    /// `version` is the number this rendition will carry once committed.
    pub async fn write_back(
        &self,
        resource_id: &ResourceId,
        action: ActionType,
        artifact: &GeneratedArtifact,
        version: u64,
        run_id: RunId,
    ) -> Result<(), PipelineError> {
        let title = format!(
            "{} {} v{}: {}",
            action_icon(action),
            action_label(action),
            version,
            artifact.title()
        );
        let container_id = self.ensure_container(resource_id, action, &title).await?;
        self.clear_children(&container_id).await?;

        let mut blocks = match artifact {
            GeneratedArtifact::Checklist(a) => render::render_checklist(a),
            GeneratedArtifact::Tree(a) => render::render_tree(a),
            GeneratedArtifact::Pages(_) => Vec::new(),
            GeneratedArtifact::Flashcards(a) => {
                let mut blocks = render::render_flashcards(a);
                blocks.push(crate::docstore::block::heading2("CSV Export"));
                let mut csv = render::flashcards_csv(a);
                truncate_chars(&mut csv, self.config.text_segment_limit);
                blocks.push(crate::docstore::block::code(&csv, "csv"));
                blocks
            }
        };
        enforce_segment_limit(&mut blocks, self.config.text_segment_limit);
        self.append_batched(&container_id, &blocks).await?;

        match artifact {
            GeneratedArtifact::Tree(a) => self.sync_tree_nodes(resource_id, a).await?,
            GeneratedArtifact::Pages(a) => {
                self.write_pages(resource_id, &container_id, a).await?
            }
            _ => {}
        }

        let mut properties = Properties::new();
        properties.insert(
            props::AI_STAGE.to_string(),
            PropertyValue::Select(AiStage::NeedsReview.as_str().to_string()),
        );
        properties.insert(
            format!("{} Page ID", action_label(action)),
            PropertyValue::Text(container_id.clone()),
        );
        properties.insert(
            props::RUN_ID.to_string(),
            PropertyValue::Text(run_id.to_string()),
        );
        self.facade
            .update_properties(resource_id.as_str(), properties)
            .await?;

        info!(
            resource_id = %resource_id,
            action = %action,
            version,
            container_id,
            "artifact written back"
        );
        Ok(())
    }

    async fn ensure_container(
        &self,
        resource_id: &ResourceId,
        action: ActionType,
        title: &str,
    ) -> Result<String, PipelineError> {
        if let Some(container_id) = self.store.container_ref(resource_id, action)? {
            let mut properties = Properties::new();
            properties.insert(
                props::NAME.to_string(),
                PropertyValue::Title(title.to_string()),
            );
            // best effort; a stale title does not fail the run
            if let Err(e) = self
                .facade
                .update_properties(&container_id, properties)
                .await
            {
                warn!(container_id, error = %e, "container title refresh failed");
            }
            debug!(container_id, "reusing container page");
            return Ok(container_id);
        }
        let container_id = self
            .facade
            .create_page(resource_id.as_str(), title, Some(action_icon(action)))
            .await?;
        self.store
            .set_container_ref(resource_id, action, &container_id)?;
        debug!(container_id, "created container page");
        Ok(container_id)
    }

    async fn clear_children(&self, container_id: &str) -> Result<(), PipelineError> {
        let child_ids = self.facade.list_child_ids(container_id).await?;
        for child_id in &child_ids {
            self.facade.delete_block(child_id).await?;
        }
        if !child_ids.is_empty() {
            debug!(container_id, cleared = child_ids.len(), "cleared stale children");
        }
        Ok(())
    }

    async fn append_batched(
        &self,
        container_id: &str,
        blocks: &[Block],
    ) -> Result<Vec<String>, PipelineError> {
        let mut created = Vec::with_capacity(blocks.len());
        for batch in blocks.chunks(self.config.block_batch_size) {
            created.extend(self.facade.append_children(container_id, batch).await?);
        }
        Ok(created)
    }

    /// Mirror tree nodes into the registry database: archive the prior
    /// rendition, create rows, then wire parent relations in a second
    /// pass once every row has an external id.
    async fn sync_tree_nodes(
        &self,
        resource_id: &ResourceId,
        artifact: &TreeArtifact,
    ) -> Result<(), PipelineError> {
        let Some(database_id) = self.config.tree_nodes_database_id.as_deref() else {
            return Ok(());
        };
        self.archive_prior(resource_id, ArtifactKind::TreeNode).await?;

        let mut external_ids: HashMap<&str, String> = HashMap::new();
        for node in &artifact.nodes {
            let mut properties = Properties::new();
            properties.insert(
                props::NAME.to_string(),
                PropertyValue::Title(node.name.clone()),
            );
            properties.insert(
                "Summary".to_string(),
                PropertyValue::Text(node.summary.clone()),
            );
            if !node.keywords.is_empty() {
                properties.insert(
                    "Keywords".to_string(),
                    PropertyValue::MultiSelect(node.keywords.clone()),
                );
            }
            properties.insert(
                props::STATUS.to_string(),
                PropertyValue::Select(ApprovalStatus::Draft.as_str().to_string()),
            );
            properties.insert(
                props::SCOPE.to_string(),
                PropertyValue::Relation(vec![resource_id.as_str().to_string()]),
            );
            let external_id = self.facade.create_record(database_id, properties).await?;
            self.store.upsert_artifact(&ArtifactRecord {
                resource_id: resource_id.clone(),
                artifact_id: node.node_id.clone(),
                external_id: external_id.clone(),
                kind: ArtifactKind::TreeNode,
                status: ApprovalStatus::Draft,
            })?;
            external_ids.insert(node.node_id.as_str(), external_id);
        }

        for node in &artifact.nodes {
            let Some(parent_id) = node.parent_id.as_deref() else {
                continue;
            };
            let (Some(own), Some(parent)) = (
                external_ids.get(node.node_id.as_str()),
                external_ids.get(parent_id),
            ) else {
                continue;
            };
            let mut properties = Properties::new();
            properties.insert(
                props::PARENT.to_string(),
                PropertyValue::Relation(vec![parent.clone()]),
            );
            self.facade.update_properties(own, properties).await?;
        }
        debug!(resource_id = %resource_id, nodes = artifact.nodes.len(), "tree nodes synced");
        Ok(())
    }

    /// One child page per page spec, mirrored into the knowledge page
    /// registry when one is configured.
    async fn write_pages(
        &self,
        resource_id: &ResourceId,
        container_id: &str,
        artifact: &PagesArtifact,
    ) -> Result<(), PipelineError> {
        self.archive_prior(resource_id, ArtifactKind::KnowledgePage)
            .await?;
        for page in &artifact.pages {
            let page_id = self
                .facade
                .create_page(container_id, &page.title, Some("📄"))
                .await?;
            let mut blocks = render::render_page(page);
            enforce_segment_limit(&mut blocks, self.config.text_segment_limit);
            self.append_batched(&page_id, &blocks).await?;

            if let Some(database_id) = self.config.knowledge_pages_database_id.as_deref() {
                let mut properties = Properties::new();
                properties.insert(
                    props::NAME.to_string(),
                    PropertyValue::Title(page.title.clone()),
                );
                properties.insert(
                    props::STATUS.to_string(),
                    PropertyValue::Select(ApprovalStatus::Draft.as_str().to_string()),
                );
                properties.insert(
                    props::SCOPE.to_string(),
                    PropertyValue::Relation(vec![resource_id.as_str().to_string()]),
                );
                let external_id = self.facade.create_record(database_id, properties).await?;
                self.store.upsert_artifact(&ArtifactRecord {
                    resource_id: resource_id.clone(),
                    artifact_id: slugify(&page.title),
                    external_id,
                    kind: ArtifactKind::KnowledgePage,
                    status: ApprovalStatus::Draft,
                })?;
            }
        }
        Ok(())
    }

    /// Mark the previous rendition's registry rows archived, locally and
    /// externally, so the cascade never approves superseded rows.
    async fn archive_prior(
        &self,
        resource_id: &ResourceId,
        kind: ArtifactKind,
    ) -> Result<(), PipelineError> {
        for record in self.store.artifacts_for(resource_id)? {
            if record.kind != kind || record.status == ApprovalStatus::Archived {
                continue;
            }
            let mut properties = Properties::new();
            properties.insert(
                props::STATUS.to_string(),
                PropertyValue::Select(ApprovalStatus::Archived.as_str().to_string()),
            );
            if let Err(e) = self
                .facade
                .update_properties(&record.external_id, properties)
                .await
            {
                warn!(external_id = record.external_id, error = %e, "archive update failed");
            }
            self.store.set_artifact_status(
                resource_id,
                &record.artifact_id,
                ApprovalStatus::Archived,
            )?;
        }
        Ok(())
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &mut String, max: usize) {
    if let Some((idx, _)) = text.char_indices().nth(max) {
        text.truncate(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_stable_and_lowercase() {
        assert_eq!(slugify("Cell Biology: An Intro"), "page_cell_biology_an_intro");
        assert_eq!(slugify("  Weird -- Title  "), "page_weird_title");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let mut text = "héllo wörld".to_string();
        truncate_chars(&mut text, 4);
        assert_eq!(text, "héll");
        let mut short = "ok".to_string();
        truncate_chars(&mut short, 10);
        assert_eq!(short, "ok");
    }
}
