//! Full-pipeline scenarios over the mock document store.

mod common;

use common::{checklist_json, resource_properties, Harness};
use std::time::Duration;
use studyforge::docstore::block::paragraph;
use studyforge::error::ExternalError;
use studyforge::store::{ArtifactKind, ArtifactRecord, StateStore};
use studyforge::types::{ActionType, ApprovalStatus, JobStatus, ResourceId};

const IDLE: Duration = Duration::from_secs(5);

fn seeded_resource(harness: &Harness, id: &str) -> ResourceId {
    harness.docstore.seed_page(
        id,
        resource_properties("Cell Biology", "Captured"),
        vec![paragraph("Chloroplasts capture light energy.")],
    );
    ResourceId::parse(id).unwrap()
}

#[tokio::test]
async fn first_run_produces_versioned_artifact() {
    let harness = Harness::new();
    let resource = seeded_resource(&harness, "T1");
    harness.generator.push_ok(&checklist_json());

    let job = harness
        .queue
        .enqueue(resource.clone(), ActionType::Checklist)
        .unwrap();
    harness.queue.start();
    assert!(harness.queue.wait_for_idle(IDLE).await);
    harness.queue.stop().await;

    let job = harness.store.get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.attempts, 1);

    let runs = harness.store.runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, JobStatus::Success);
    assert_eq!(runs[0].input_tokens, 100);
    assert_eq!(runs[0].output_tokens, 50);
    assert!(runs[0].output_snapshot.as_deref().unwrap().contains("Study plan"));

    let versions = harness.store.versions(&resource).unwrap();
    assert_eq!(versions[&ActionType::Checklist], 1);
    assert_eq!(versions[&ActionType::Tree], 0);

    let container_id = harness
        .store
        .container_ref(&resource, ActionType::Checklist)
        .unwrap()
        .expect("container recorded");
    let container = harness.docstore.record(&container_id).unwrap();
    assert_eq!(container.title(), Some("✅ Checklist v1: Study plan"));
    // heading plus two checklist items
    assert_eq!(harness.docstore.blocks_of(&container_id).len(), 3);

    let record = harness.docstore.record("T1").unwrap();
    assert_eq!(record.select("AI Stage"), Some("Needs review"));
    assert_eq!(record.text("Checklist Page ID"), Some(container_id.as_str()));
    assert!(record.text("Run ID").is_some());
}

#[tokio::test]
async fn rerun_reuses_container_and_bumps_version() {
    let harness = Harness::new();
    let resource = seeded_resource(&harness, "T1");
    harness.queue.start();

    harness.generator.push_ok(&checklist_json());
    harness
        .queue
        .enqueue(resource.clone(), ActionType::Checklist)
        .unwrap();
    assert!(harness.queue.wait_for_idle(IDLE).await);
    let first_container = harness
        .store
        .container_ref(&resource, ActionType::Checklist)
        .unwrap()
        .unwrap();

    harness.generator.push_ok(&checklist_json());
    harness
        .queue
        .enqueue(resource.clone(), ActionType::Checklist)
        .unwrap();
    assert!(harness.queue.wait_for_idle(IDLE).await);
    harness.queue.stop().await;

    let second_container = harness
        .store
        .container_ref(&resource, ActionType::Checklist)
        .unwrap()
        .unwrap();
    assert_eq!(first_container, second_container);

    // children were cleared, not accumulated
    assert_eq!(harness.docstore.blocks_of(&second_container).len(), 3);

    let versions = harness.store.versions(&resource).unwrap();
    assert_eq!(versions[&ActionType::Checklist], 2);
    let container = harness.docstore.record(&second_container).unwrap();
    assert_eq!(container.title(), Some("✅ Checklist v2: Study plan"));
}

#[tokio::test]
async fn transient_generation_failures_back_off_then_succeed() {
    let harness = Harness::new();
    let resource = seeded_resource(&harness, "T1");
    for _ in 0..3 {
        harness
            .generator
            .push_err(ExternalError::transient(Some(429), "rate limited"));
    }
    harness.generator.push_ok(&checklist_json());

    let started = std::time::Instant::now();
    let job = harness
        .queue
        .enqueue(resource.clone(), ActionType::Checklist)
        .unwrap();
    harness.queue.start();
    assert!(harness.queue.wait_for_idle(IDLE).await);
    harness.queue.stop().await;

    // all retries happened inside one job attempt
    let job = harness.store.get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.attempts, 1);
    assert_eq!(harness.generator.calls(), 4);
    // zero-jitter backoff: 10ms + 20ms + 40ms minimum
    assert!(started.elapsed() >= Duration::from_millis(70));
}

#[tokio::test]
async fn permanent_failure_writes_error_properties() {
    let harness = Harness::new();
    let resource = seeded_resource(&harness, "T1");
    harness
        .generator
        .push_err(ExternalError::permanent(400, "prompt rejected"));

    let job = harness
        .queue
        .enqueue(resource.clone(), ActionType::Checklist)
        .unwrap();
    harness.queue.start();
    assert!(harness.queue.wait_for_idle(IDLE).await);
    harness.queue.stop().await;

    let job = harness.store.get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert!(job.error.as_deref().unwrap().contains("prompt rejected"));

    let record = harness.docstore.record("T1").unwrap();
    assert_eq!(record.select("AI Stage"), Some("Failed"));
    assert!(record.text("Error").unwrap().contains("prompt rejected"));

    // nothing was committed
    let versions = harness.store.versions(&resource).unwrap();
    assert_eq!(versions[&ActionType::Checklist], 0);
}

#[tokio::test]
async fn approve_cascade_partial_failure_converges_on_retry() {
    let harness = Harness::new();
    harness
        .docstore
        .seed_page("T1", resource_properties("Cell Biology", "Reading"), vec![]);
    let resource = ResourceId::parse("T1").unwrap();

    let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
    for name in names {
        harness
            .store
            .upsert_artifact(&ArtifactRecord {
                resource_id: resource.clone(),
                artifact_id: format!("node_{name}"),
                external_id: format!("rec-{name}"),
                kind: ArtifactKind::TreeNode,
                status: ApprovalStatus::Draft,
            })
            .unwrap();
    }
    // enough consecutive failures to exhaust the facade's five attempts
    // for the first three artifacts, so the cascade itself sees them fail
    for _ in 0..15 {
        harness
            .docstore
            .queue_failure("update_properties", ExternalError::transient(Some(500), "flaky"));
    }

    let job = harness
        .queue
        .enqueue(resource.clone(), ActionType::Approve)
        .unwrap();
    harness.queue.start();
    assert!(harness.queue.wait_for_idle(IDLE).await);
    harness.queue.stop().await;

    let job = harness.store.get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Success);

    // every artifact ended Approved, locally and externally
    for record in harness.store.artifacts_for(&resource).unwrap() {
        assert_eq!(record.status, ApprovalStatus::Approved);
        let external = harness.docstore.record(&record.external_id).unwrap();
        assert_eq!(external.select("Status"), Some("Approved"));
    }

    // the failed run recorded the partial application
    let runs = harness.store.runs().unwrap();
    let failed: Vec<_> = runs
        .iter()
        .filter(|run| run.status == JobStatus::Failed)
        .collect();
    assert!(!failed.is_empty());
    let message = failed[0].error.as_deref().unwrap();
    assert!(message.contains("partially applied"));

    // resource advanced exactly one workflow step after full success
    let record = harness.docstore.record("T1").unwrap();
    assert_eq!(record.select("AI Stage"), Some("Approved"));
    assert_eq!(record.select("Status"), Some("Synthesizing"));
}

#[tokio::test]
async fn empty_resource_fails_validation_without_generation() {
    let harness = Harness::new();
    harness
        .docstore
        .seed_page("T1", resource_properties("Empty", "Captured"), vec![]);
    let resource = ResourceId::parse("T1").unwrap();

    let job = harness
        .queue
        .enqueue(resource, ActionType::Checklist)
        .unwrap();
    harness.queue.start();
    assert!(harness.queue.wait_for_idle(IDLE).await);
    harness.queue.stop().await;

    let job = harness.store.get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    // validation failures never consume attempts beyond the first
    assert_eq!(job.attempts, 1);
    assert!(job.error.as_deref().unwrap().contains("no content"));
    assert_eq!(harness.generator.calls(), 0);
}
