//! Approve cascade.
//!
//! Flips every draft artifact of a resource to Approved in the external
//! store, then advances the resource itself. The resource properties
//! are only touched after every artifact flip succeeded, so a partial
//! failure leaves the resource in review and a retry picks up exactly
//! the artifacts still pending: already-approved rows are skipped.

use crate::docstore::facade::StoreFacade;
use crate::docstore::{props, Properties, PropertyValue};
use crate::error::PipelineError;
use crate::store::StateStore;
use crate::types::{advance_workflow, AiStage, ApprovalStatus, ResourceId, RunId};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run_cascade(
    store: &Arc<dyn StateStore>,
    facade: &StoreFacade,
    resource_id: &ResourceId,
    run_id: RunId,
) -> Result<(), PipelineError> {
    let pending: Vec<_> = store
        .artifacts_for(resource_id)?
        .into_iter()
        .filter(|record| record.status == ApprovalStatus::Draft)
        .collect();

    let mut applied = 0usize;
    let mut remaining: Vec<String> = Vec::new();
    let mut any_transient = false;

    for record in &pending {
        let mut properties = Properties::new();
        properties.insert(
            props::STATUS.to_string(),
            PropertyValue::Select(ApprovalStatus::Approved.as_str().to_string()),
        );
        match facade
            .update_properties(&record.external_id, properties)
            .await
        {
            Ok(()) => {
                store.set_artifact_status(
                    resource_id,
                    &record.artifact_id,
                    ApprovalStatus::Approved,
                )?;
                applied += 1;
            }
            Err(e) => {
                warn!(
                    external_id = record.external_id,
                    artifact_id = record.artifact_id,
                    error = %e,
                    "artifact approval failed"
                );
                any_transient |= e.is_retryable();
                remaining.push(record.artifact_id.clone());
            }
        }
    }

    if !remaining.is_empty() {
        return Err(PipelineError::PartialCascade {
            applied,
            remaining,
            retryable: any_transient,
        });
    }

    let record = facade.get_record(resource_id.as_str()).await?;
    let current = record.select(props::STATUS);
    let next = advance_workflow(current);

    let mut properties = Properties::new();
    properties.insert(
        props::AI_STAGE.to_string(),
        PropertyValue::Select(AiStage::Approved.as_str().to_string()),
    );
    properties.insert(
        props::STATUS.to_string(),
        PropertyValue::Select(next.to_string()),
    );
    properties.insert(
        props::RUN_ID.to_string(),
        PropertyValue::Text(run_id.to_string()),
    );
    facade
        .update_properties(resource_id.as_str(), properties)
        .await?;

    info!(
        resource_id = %resource_id,
        approved = applied,
        workflow = next,
        "approve cascade complete"
    );
    Ok(())
}
