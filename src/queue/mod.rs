//! Durable job queue.
//!
//! Jobs are persisted before they are visible to workers, so a crash
//! between trigger and execution loses nothing. Workers claim from the
//! pending FIFO in order, skipping resources that already have a job in
//! flight: runs for the same resource never interleave, runs for
//! different resources proceed concurrently.

use crate::config::WorkerConfig;
use crate::error::StorageError;
use crate::limiter::RetryPolicy;
use crate::store::{Job, StateStore};
use crate::types::{ActionType, JobId, JobStatus, ResourceId};
use chrono::{DateTime, Utc};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of one execution attempt, as reported by the executor. The
/// executor has already persisted job and run state; the queue only
/// schedules what happens next.
#[derive(Debug)]
pub enum Disposition {
    Success,
    /// Transient failure, job was re-marked queued. The queue parks it
    /// in the FIFO until its backoff expires.
    Retry { error: String },
    /// Terminal failure.
    Failed { error: String },
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Disposition;
}

struct QueueInner {
    store: Arc<dyn StateStore>,
    executor: Arc<dyn JobExecutor>,
    notify: Notify,
    /// Resources with a job currently executing.
    active: Mutex<HashSet<String>>,
    running: RwLock<bool>,
    retry: RetryPolicy,
    max_attempts: u32,
}

pub struct JobQueue {
    inner: Arc<QueueInner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn StateStore>,
        executor: Arc<dyn JobExecutor>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                store,
                executor,
                notify: Notify::new(),
                active: Mutex::new(HashSet::new()),
                running: RwLock::new(false),
                retry: RetryPolicy::new(&config.retry),
                max_attempts: config.max_job_attempts,
            }),
            handles: Mutex::new(Vec::new()),
            worker_count: config.workers,
        }
    }

    /// Persist a new job and make it visible to workers.
    pub fn enqueue(
        &self,
        resource_id: ResourceId,
        action: ActionType,
    ) -> Result<Job, StorageError> {
        let job = Job::new(resource_id, action, self.inner.max_attempts);
        self.inner.store.put_job(&job)?;
        self.inner.store.push_pending(&job.id)?;
        info!(job_id = %job.id, resource_id = %job.resource_id, action = %job.action, "job enqueued");
        self.inner.notify.notify_one();
        Ok(job)
    }

    /// Put an existing job back in front of the workers. The caller has
    /// already reset its status to queued.
    pub fn resubmit(&self, job: &Job) -> Result<(), StorageError> {
        self.inner.store.put_job(job)?;
        self.inner.store.push_pending(&job.id)?;
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Requeue interrupted work after a restart. Jobs left in `running`
    /// are re-marked queued with their open runs closed as failed, or
    /// marked failed outright when their attempts are spent. Queued jobs
    /// missing their FIFO entry (a crash landed between the status write
    /// and the push) are pushed back. Safe to call more than once.
    pub fn recover_interrupted(&self) -> Result<usize, StorageError> {
        let store = &self.inner.store;
        let interrupted = store.jobs_with_status(JobStatus::Running)?;
        for job in &interrupted {
            for run in store.runs()? {
                if run.job_id == job.id && !run.status.is_terminal() {
                    store.finish_run(
                        &run.id,
                        crate::store::RunCompletion {
                            status: JobStatus::Failed,
                            input_tokens: run.input_tokens,
                            output_tokens: run.output_tokens,
                            error: Some("process restarted mid-run".to_string()),
                            output_snapshot: None,
                        },
                    )?;
                }
            }
            let mut job = job.clone();
            if job.attempts >= job.max_attempts {
                job.status = JobStatus::Failed;
                job.error = Some("interrupted with no attempts remaining".to_string());
                job.updated_at = chrono::Utc::now();
                store.put_job(&job)?;
                warn!(job_id = %job.id, "interrupted job out of attempts, marked failed");
            } else {
                job.status = JobStatus::Queued;
                job.updated_at = chrono::Utc::now();
                store.put_job(&job)?;
                store.push_pending(&job.id)?;
                info!(job_id = %job.id, attempts = job.attempts, "interrupted job requeued");
            }
        }
        let mut recovered = interrupted.len();
        let listed: HashSet<JobId> = store.pending()?.into_iter().map(|(_, id)| id).collect();
        for job in store.jobs_with_status(JobStatus::Queued)? {
            if !listed.contains(&job.id) {
                store.push_pending(&job.id)?;
                recovered += 1;
                info!(job_id = %job.id, "queued job restored to pending");
            }
        }
        Ok(recovered)
    }

    pub fn start(&self) {
        {
            let mut running = self.inner.running.write();
            if *running {
                return;
            }
            *running = true;
        }
        let mut handles = self.handles.lock();
        for worker in 0..self.worker_count {
            let inner = Arc::clone(&self.inner);
            handles.push(tokio::spawn(async move {
                worker_loop(inner, worker).await;
            }));
        }
        info!(workers = self.worker_count, "queue workers started");
    }

    pub async fn stop(&self) {
        *self.inner.running.write() = false;
        self.inner.notify.notify_waiters();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("queue workers stopped");
    }

    /// Block until no work is pending or executing, up to `timeout`.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let pending = self.inner.store.pending().map(|p| p.len()).unwrap_or(0);
            let active = self.inner.active.lock().len();
            if pending == 0 && active == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// What one scan of the pending FIFO produced.
enum Claim {
    Job(Job),
    /// Nothing claimable until the earliest backoff expires.
    Parked(Duration),
    Empty,
}

/// Pull the first pending job whose resource is not already in flight
/// and whose backoff, if any, has expired. Claiming removes the FIFO
/// entry and takes the resource lock in one critical section; jobs
/// still backing off keep their entry, so they survive a restart and
/// count as pending work.
fn claim_next(inner: &QueueInner) -> Result<Claim, StorageError> {
    let mut active = inner.active.lock();
    let now = Utc::now();
    let mut earliest: Option<DateTime<Utc>> = None;
    for (seq, job_id) in inner.store.pending()? {
        let job = match inner.store.get_job(&job_id) {
            Ok(job) => job,
            Err(StorageError::JobNotFound(_)) => {
                inner.store.remove_pending(seq)?;
                continue;
            }
            Err(e) => return Err(e),
        };
        if job.status != JobStatus::Queued {
            // stale entry from a superseded requeue
            inner.store.remove_pending(seq)?;
            continue;
        }
        if active.contains(job.resource_id.as_str()) {
            continue;
        }
        if let Some(due) = job.not_before {
            if due > now {
                earliest = Some(earliest.map_or(due, |e| e.min(due)));
                continue;
            }
        }
        inner.store.remove_pending(seq)?;
        active.insert(job.resource_id.as_str().to_string());
        let mut job = job;
        if job.not_before.take().is_some() {
            inner.store.put_job(&job)?;
        }
        return Ok(Claim::Job(job));
    }
    match earliest {
        Some(due) => {
            let wait = (due - now).to_std().unwrap_or(Duration::ZERO);
            Ok(Claim::Parked(wait))
        }
        None => Ok(Claim::Empty),
    }
}

/// Stamp the retry due time on a job the executor re-marked queued and
/// put its FIFO entry back.
fn park_for_retry(inner: &QueueInner, id: &JobId, delay: Duration) -> Result<(), StorageError> {
    let mut job = inner.store.get_job(id)?;
    job.not_before = Some(Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
    job.updated_at = Utc::now();
    inner.store.put_job(&job)?;
    inner.store.push_pending(id)?;
    inner.notify.notify_one();
    Ok(())
}

async fn worker_loop(inner: Arc<QueueInner>, worker: usize) {
    debug!(worker, "worker loop started");
    while *inner.running.read() {
        let job = match claim_next(&inner) {
            Ok(Claim::Job(job)) => job,
            Ok(Claim::Parked(wait)) => {
                tokio::select! {
                    _ = inner.notify.notified() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
                continue;
            }
            Ok(Claim::Empty) => {
                tokio::select! {
                    _ = inner.notify.notified() => {}
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
                continue;
            }
            Err(e) => {
                error!(worker, error = %e, "failed to claim work");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        debug!(worker, job_id = %job.id, action = %job.action, "executing job");
        let disposition = inner.executor.execute(&job).await;
        match disposition {
            Disposition::Success => {
                info!(worker, job_id = %job.id, "job succeeded");
            }
            Disposition::Retry { error } => {
                let delay = inner.retry.delay(job.attempts.saturating_sub(1) as usize);
                warn!(
                    worker,
                    job_id = %job.id,
                    attempts = job.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error,
                    "job will retry"
                );
                // due time rides on the job; the FIFO entry stays put
                if let Err(e) = park_for_retry(&inner, &job.id, delay) {
                    error!(job_id = %job.id, error = %e, "failed to requeue job");
                }
            }
            Disposition::Failed { error } => {
                warn!(worker, job_id = %job.id, error, "job failed terminally");
            }
        }

        inner.active.lock().remove(job.resource_id.as_str());
        // a same-resource job may have been skipped while we held the lock
        inner.notify.notify_one();
    }
    debug!(worker, "worker loop stopped");
}
