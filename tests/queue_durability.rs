//! Queue ordering, per-resource serialization, and crash recovery.

mod common;

use async_trait::async_trait;
use common::fast_retry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use studyforge::config::WorkerConfig;
use studyforge::queue::{Disposition, JobExecutor, JobQueue};
use studyforge::store::{Job, Run, SledStateStore, StateStore};
use studyforge::types::{ActionType, JobStatus, ResourceId};
use tempfile::TempDir;

const IDLE: Duration = Duration::from_secs(5);

/// Executor that records execution order and an enter/exit trace.
struct TracingExecutor {
    trace: Mutex<Vec<String>>,
    store: Arc<dyn StateStore>,
    hold: Duration,
}

#[async_trait]
impl JobExecutor for TracingExecutor {
    async fn execute(&self, job: &Job) -> Disposition {
        self.trace
            .lock()
            .push(format!("enter:{}:{}", job.resource_id, job.action));
        tokio::time::sleep(self.hold).await;
        let mut done = job.clone();
        done.attempts += 1;
        done.status = JobStatus::Success;
        if let Err(e) = self.store.put_job(&done) {
            return Disposition::Failed {
                error: e.to_string(),
            };
        }
        self.trace
            .lock()
            .push(format!("exit:{}:{}", job.resource_id, job.action));
        Disposition::Success
    }
}

fn worker_config(workers: usize) -> WorkerConfig {
    WorkerConfig {
        workers,
        max_job_attempts: 3,
        retry: fast_retry(),
    }
}

fn build_queue(
    dir: &TempDir,
    workers: usize,
    hold: Duration,
) -> (Arc<JobQueue>, Arc<SledStateStore>, Arc<TracingExecutor>) {
    let store = Arc::new(SledStateStore::open(dir.path()).unwrap());
    let executor = Arc::new(TracingExecutor {
        trace: Mutex::new(Vec::new()),
        store: store.clone() as Arc<dyn StateStore>,
        hold,
    });
    let queue = Arc::new(JobQueue::new(
        store.clone() as Arc<dyn StateStore>,
        executor.clone() as Arc<dyn JobExecutor>,
        &worker_config(workers),
    ));
    (queue, store, executor)
}

#[tokio::test]
async fn single_worker_preserves_fifo_order() {
    let dir = TempDir::new().unwrap();
    let (queue, _store, executor) = build_queue(&dir, 1, Duration::ZERO);
    for (name, action) in [
        ("T1", ActionType::Checklist),
        ("T2", ActionType::Tree),
        ("T3", ActionType::Pages),
    ] {
        queue
            .enqueue(ResourceId::parse(name).unwrap(), action)
            .unwrap();
    }
    queue.start();
    assert!(queue.wait_for_idle(IDLE).await);
    queue.stop().await;

    let enters: Vec<String> = executor
        .trace
        .lock()
        .iter()
        .filter(|line| line.starts_with("enter"))
        .cloned()
        .collect();
    assert_eq!(
        enters,
        vec!["enter:T1:checklist", "enter:T2:tree", "enter:T3:pages"]
    );
}

#[tokio::test]
async fn same_resource_jobs_never_interleave() {
    let dir = TempDir::new().unwrap();
    let (queue, _store, executor) = build_queue(&dir, 2, Duration::from_millis(50));
    let t1 = ResourceId::parse("T1").unwrap();
    queue.enqueue(t1.clone(), ActionType::Checklist).unwrap();
    queue.enqueue(t1.clone(), ActionType::Tree).unwrap();
    queue
        .enqueue(ResourceId::parse("T2").unwrap(), ActionType::Pages)
        .unwrap();
    queue.start();
    assert!(queue.wait_for_idle(IDLE).await);
    queue.stop().await;

    // between a T1 enter and its exit no other T1 enter appears
    let trace = executor.trace.lock().clone();
    let mut t1_depth = 0i32;
    for line in &trace {
        if line.contains(":T1:") {
            if line.starts_with("enter") {
                t1_depth += 1;
                assert_eq!(t1_depth, 1, "T1 runs interleaved: {trace:?}");
            } else {
                t1_depth -= 1;
            }
        }
    }
    assert_eq!(trace.iter().filter(|l| l.contains(":T1:")).count(), 4);
}

#[tokio::test]
async fn interrupted_job_recovers_exactly_once() {
    let dir = TempDir::new().unwrap();
    let resource = ResourceId::parse("T1").unwrap();
    let job_id = {
        let store = SledStateStore::open(dir.path()).unwrap();
        let mut job = Job::new(resource.clone(), ActionType::Tree, 3);
        job.status = JobStatus::Running;
        job.attempts = 1;
        store.put_job(&job).unwrap();
        let run = Run::begin(&job, "model-x", "v1.1");
        store.append_run(&run).unwrap();
        store.flush().unwrap();
        job.id
    };

    // restart
    let (queue, store, _executor) = build_queue(&dir, 1, Duration::ZERO);
    assert_eq!(queue.recover_interrupted().unwrap(), 1);

    let job = store.get_job(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 1);
    let pending = store.pending().unwrap();
    assert_eq!(pending.len(), 1);

    // the orphaned run was closed
    let runs = store.runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, JobStatus::Failed);
    assert!(runs[0].error.as_deref().unwrap().contains("restarted"));

    // a second recovery pass changes nothing
    assert_eq!(queue.recover_interrupted().unwrap(), 0);
    assert_eq!(store.pending().unwrap().len(), 1);

    queue.start();
    assert!(queue.wait_for_idle(IDLE).await);
    queue.stop().await;
    assert_eq!(store.get_job(&job_id).unwrap().status, JobStatus::Success);
}

#[tokio::test]
async fn stale_pending_entries_are_discarded() {
    let dir = TempDir::new().unwrap();
    let (queue, store, executor) = build_queue(&dir, 1, Duration::ZERO);
    let resource = ResourceId::parse("T1").unwrap();
    let job = queue.enqueue(resource, ActionType::Checklist).unwrap();

    // job reached a terminal state out of band; its pending entry is stale
    let mut done = job.clone();
    done.status = JobStatus::Success;
    store.put_job(&done).unwrap();

    queue.start();
    assert!(queue.wait_for_idle(IDLE).await);
    queue.stop().await;
    assert!(executor.trace.lock().is_empty());
    assert!(store.pending().unwrap().is_empty());
}

#[tokio::test]
async fn retry_disposition_requeues_after_backoff() {
    struct FlakyExecutor {
        store: Arc<dyn StateStore>,
        failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl JobExecutor for FlakyExecutor {
        async fn execute(&self, job: &Job) -> Disposition {
            let mut job = job.clone();
            job.attempts += 1;
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                job.status = JobStatus::Queued;
                let _ = self.store.put_job(&job);
                Disposition::Retry {
                    error: "transient".to_string(),
                }
            } else {
                job.status = JobStatus::Success;
                let _ = self.store.put_job(&job);
                Disposition::Success
            }
        }
    }

    let dir = TempDir::new().unwrap();
    let store = Arc::new(SledStateStore::open(dir.path()).unwrap());
    let executor = Arc::new(FlakyExecutor {
        store: store.clone() as Arc<dyn StateStore>,
        failures_left: Mutex::new(2),
    });
    let queue = Arc::new(JobQueue::new(
        store.clone() as Arc<dyn StateStore>,
        executor,
        &worker_config(1),
    ));
    let job = queue
        .enqueue(ResourceId::parse("T1").unwrap(), ActionType::Flashcards)
        .unwrap();
    queue.start();
    // a job sitting out its backoff still counts as pending work, so a
    // single wait covers both retry windows
    assert!(queue.wait_for_idle(IDLE).await);
    queue.stop().await;

    let job = store.get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.attempts, 3);
}

#[tokio::test]
async fn job_parked_for_backoff_survives_restart() {
    let dir = TempDir::new().unwrap();
    let resource = ResourceId::parse("T1").unwrap();

    // a crash can land between the queued-status write and the FIFO
    // push; the job must not be stranded
    let job_id = {
        let store = SledStateStore::open(dir.path()).unwrap();
        let mut job = Job::new(resource.clone(), ActionType::Checklist, 3);
        job.attempts = 1;
        job.not_before = Some(chrono::Utc::now() + chrono::Duration::milliseconds(50));
        store.put_job(&job).unwrap();
        store.flush().unwrap();
        job.id
    };

    let (queue, store, executor) = build_queue(&dir, 1, Duration::ZERO);
    assert_eq!(queue.recover_interrupted().unwrap(), 1);
    assert_eq!(store.pending().unwrap().len(), 1);
    assert_eq!(store.get_job(&job_id).unwrap().status, JobStatus::Queued);

    queue.start();
    assert!(queue.wait_for_idle(IDLE).await);
    queue.stop().await;

    assert_eq!(store.get_job(&job_id).unwrap().status, JobStatus::Success);
    assert_eq!(executor.trace.lock().len(), 2);
}
