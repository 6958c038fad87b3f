//! Batch job lifecycle management.
//!
//! A bounded worker pool claims items through a shared atomic cursor, so
//! an item is processed exactly once no matter how many workers run.
//! Pause and cancel are cooperative flags observed between items, never
//! mid-item; a paused job resumes from the claim cursor with no duplicate
//! or skipped work. Per-item failures are recorded and counted but never
//! fail the job; only an infrastructure error does that. Terminal jobs
//! stay pollable for a retention window, then a sweep drops them.

use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

use chrono::{DateTime, Utc};

use crate::batch::{BatchJobSnapshot, ItemFailure, JobKind, JobStatus};
use crate::cache::Caches;
use crate::config::BatchConfig;
use crate::db::Db;
use crate::error::{BomGraphError, Result};
use crate::store::{self, JobCheckpoint};

/// Type-erased per-item operation.
type ItemProcessor =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Shared mutable state of one job. Counters are atomics; the status word
/// and the small metadata fields sit behind short-lived mutexes.
struct JobState {
    id: String,
    kind: JobKind,
    items: Arc<Vec<String>>,
    processor: ItemProcessor,
    status: Mutex<JobStatus>,
    /// Next item index to claim. Workers fetch_add, so each index is
    /// claimed by exactly one worker.
    cursor: AtomicU64,
    processed: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    active_workers: AtomicU64,
    pause_requested: AtomicBool,
    cancel_requested: AtomicBool,
    abort_error: Mutex<Option<String>>,
    last_item: Mutex<Option<String>>,
    failures: Mutex<Vec<ItemFailure>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    ended_at: Mutex<Option<DateTime<Utc>>>,
    /// Retention clock for the sweep, monotonic.
    ended_instant: Mutex<Option<Instant>>,
}

impl JobState {
    fn transition(&self, next: JobStatus) -> Result<JobStatus> {
        let mut status = self.status.lock().unwrap();
        if !status.can_transition_to(next) {
            return Err(BomGraphError::InvalidInput(format!(
                "job {}: illegal transition {:?} -> {:?}",
                self.id, *status, next
            )));
        }
        let previous = *status;
        *status = next;
        Ok(previous)
    }

    fn status(&self) -> JobStatus {
        *self.status.lock().unwrap()
    }

    fn snapshot(&self) -> BatchJobSnapshot {
        let total = self.items.len() as u64;
        let processed = self.processed.load(Ordering::Relaxed);
        BatchJobSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status(),
            total_items: total,
            processed_items: processed,
            success_count: self.success.load(Ordering::Relaxed),
            failure_count: self.failure.load(Ordering::Relaxed),
            percent_complete: if total == 0 {
                100.0
            } else {
                (processed as f64 / total as f64) * 100.0
            },
            last_processed_item_id: self.last_item.lock().unwrap().clone(),
            start_time: *self.started_at.lock().unwrap(),
            end_time: *self.ended_at.lock().unwrap(),
            error_detail: self.abort_error.lock().unwrap().clone(),
            item_failures: self.failures.lock().unwrap().clone(),
        }
    }

    fn checkpoint(&self) -> JobCheckpoint {
        let cursor = (self.cursor.load(Ordering::Relaxed) as usize).min(self.items.len()) as u64;
        JobCheckpoint {
            job_id: self.id.clone(),
            kind: self.kind.as_str().to_string(),
            cursor,
            total_items: self.items.len() as u64,
            success_count: self.success.load(Ordering::Relaxed),
            failure_count: self.failure.load(Ordering::Relaxed),
            last_item: self.last_item.lock().unwrap().clone(),
            items: self.items.as_ref().clone(),
        }
    }
}

/// Owns every batch job for the life of the process.
pub struct BatchJobManager {
    jobs: DashMap<String, Arc<JobState>>,
    worker_count: usize,
    retention: Duration,
    persist_checkpoints: bool,
    db: Option<Arc<Db>>,
    caches: Option<Arc<Caches>>,
}

impl BatchJobManager {
    /// `db` is required only when checkpoint persistence is enabled;
    /// `caches` are invalidated whenever an export-all job lands, since a
    /// fresh export corpus can change every ranking.
    pub fn new(config: &BatchConfig, db: Option<Arc<Db>>, caches: Option<Arc<Caches>>) -> Self {
        Self {
            jobs: DashMap::new(),
            worker_count: config.worker_count.max(1),
            retention: Duration::from_secs(config.retention_secs),
            persist_checkpoints: config.persist_checkpoints,
            db,
            caches,
        }
    }

    /// Accept a batch operation; the job starts Queued.
    pub fn submit<F, Fut>(&self, kind: JobKind, items: Vec<String>, process: F) -> String
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let processor: ItemProcessor = Arc::new(move |item| Box::pin(process(item)));
        let id = Uuid::new_v4().to_string();
        let state = Arc::new(JobState {
            id: id.clone(),
            kind,
            items: Arc::new(items),
            processor,
            status: Mutex::new(JobStatus::Queued),
            cursor: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
            pause_requested: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            abort_error: Mutex::new(None),
            last_item: Mutex::new(None),
            failures: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
            ended_at: Mutex::new(None),
            ended_instant: Mutex::new(None),
        });
        self.jobs.insert(id.clone(), state);
        log::info!("Batch job {} accepted ({:?})", id, kind);
        id
    }

    /// Rebuild a job from a durable checkpoint (after a process restart).
    /// The job lands in Paused and continues with [`resume`].
    pub fn adopt_checkpoint<F, Fut>(&self, checkpoint: JobCheckpoint, process: F) -> Result<String>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let kind = JobKind::parse(&checkpoint.kind)?;
        let processor: ItemProcessor = Arc::new(move |item| Box::pin(process(item)));
        let id = checkpoint.job_id.clone();
        let state = Arc::new(JobState {
            id: id.clone(),
            kind,
            items: Arc::new(checkpoint.items),
            processor,
            status: Mutex::new(JobStatus::Paused),
            cursor: AtomicU64::new(checkpoint.cursor),
            processed: AtomicU64::new(checkpoint.cursor),
            success: AtomicU64::new(checkpoint.success_count),
            failure: AtomicU64::new(checkpoint.failure_count),
            active_workers: AtomicU64::new(0),
            pause_requested: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            abort_error: Mutex::new(None),
            last_item: Mutex::new(checkpoint.last_item),
            failures: Mutex::new(Vec::new()),
            started_at: Mutex::new(Some(Utc::now())),
            ended_at: Mutex::new(None),
            ended_instant: Mutex::new(None),
        });
        self.jobs.insert(id.clone(), state);
        log::info!("Batch job {} adopted from checkpoint at cursor {}", id, checkpoint.cursor);
        Ok(id)
    }

    /// Queued → Processing; spawns the worker pool.
    pub fn start(&self, job_id: &str) -> Result<()> {
        let state = self.job(job_id)?;
        state.transition(JobStatus::Processing)?;
        *state.started_at.lock().unwrap() = Some(Utc::now());
        self.spawn_workers(&state);
        Ok(())
    }

    /// Request a pause; takes effect at the next item boundary.
    pub fn pause(&self, job_id: &str) -> Result<()> {
        let state = self.job(job_id)?;
        if state.status() != JobStatus::Processing {
            return Err(BomGraphError::InvalidInput(format!(
                "job {}: cannot pause in status {:?}",
                job_id,
                state.status()
            )));
        }
        state.pause_requested.store(true, Ordering::Relaxed);
        log::info!("Batch job {} pause requested", job_id);
        Ok(())
    }

    /// Paused → Processing, continuing after the last processed item.
    pub fn resume(&self, job_id: &str) -> Result<()> {
        let state = self.job(job_id)?;
        state.transition(JobStatus::Processing)?;
        state.pause_requested.store(false, Ordering::Relaxed);
        log::info!(
            "Batch job {} resumed at cursor {}",
            job_id,
            state.cursor.load(Ordering::Relaxed)
        );
        self.spawn_workers(&state);
        Ok(())
    }

    /// Cancel a Processing or Paused job. Cooperative for running workers;
    /// immediate for a paused job.
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        let state = self.job(job_id)?;
        match state.status() {
            JobStatus::Processing => {
                state.cancel_requested.store(true, Ordering::Relaxed);
                log::info!("Batch job {} cancel requested", job_id);
                Ok(())
            }
            JobStatus::Paused => {
                state.transition(JobStatus::Cancelled)?;
                self.finalize(&state);
                Ok(())
            }
            other => Err(BomGraphError::InvalidInput(format!(
                "job {}: cannot cancel in status {:?}",
                job_id, other
            ))),
        }
    }

    /// Snapshot for polling clients, None when unknown or swept.
    pub fn snapshot(&self, job_id: &str) -> Option<BatchJobSnapshot> {
        self.jobs.get(job_id).map(|state| state.snapshot())
    }

    /// Drop terminal jobs past the retention window.
    pub fn sweep(&self) {
        let expired: Vec<String> = self
            .jobs
            .iter()
            .filter(|entry| {
                entry.value().status().is_terminal()
                    && entry
                        .value()
                        .ended_instant
                        .lock()
                        .unwrap()
                        .map(|t| t.elapsed() > self.retention)
                        .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in expired {
            self.jobs.remove(&id);
            log::debug!("Swept batch job {}", id);
        }
    }

    /// Background sweep loop, stopped automatically when the manager is
    /// dropped.
    pub fn spawn_sweeper(manager: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(manager);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match weak.upgrade() {
                    Some(manager) => manager.sweep(),
                    None => break,
                }
            }
        });
    }

    fn job(&self, job_id: &str) -> Result<Arc<JobState>> {
        self.jobs
            .get(job_id)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| BomGraphError::JobNotFound(job_id.to_string()))
    }

    fn spawn_workers(&self, state: &Arc<JobState>) {
        let remaining = state
            .items
            .len()
            .saturating_sub(state.cursor.load(Ordering::Relaxed) as usize);
        let workers = self.worker_count.min(remaining).max(1);
        state.active_workers.store(workers as u64, Ordering::SeqCst);

        for _ in 0..workers {
            let state = Arc::clone(state);
            let db = self.db.clone();
            let caches = self.caches.clone();
            let persist = self.persist_checkpoints;
            tokio::spawn(async move {
                worker_loop(&state).await;
                // Last worker out settles the job's next state
                if state.active_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
                    settle(&state, db.as_deref(), caches.as_deref(), persist).await;
                }
            });
        }
    }

    fn finalize(&self, state: &Arc<JobState>) {
        mark_ended(state);
        if self.persist_checkpoints {
            if let Some(db) = self.db.clone() {
                let job_id = state.id.clone();
                tokio::spawn(async move {
                    if let Err(e) = store::delete_checkpoint(&db, &job_id).await {
                        log::warn!("Failed to delete checkpoint for {}: {}", job_id, e);
                    }
                });
            }
        }
    }
}

/// Claim-process loop for one worker. Flags are checked between items only,
/// so an item is never abandoned half-done.
async fn worker_loop(state: &JobState) {
    let total = state.items.len() as u64;
    loop {
        if state.cancel_requested.load(Ordering::Relaxed)
            || state.pause_requested.load(Ordering::Relaxed)
            || state.abort_error.lock().unwrap().is_some()
        {
            break;
        }

        let idx = state.cursor.fetch_add(1, Ordering::SeqCst);
        if idx >= total {
            break;
        }
        let item = state.items[idx as usize].clone();

        match (state.processor)(item.clone()).await {
            Ok(()) => {
                state.success.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) if e.is_infrastructure() => {
                log::error!("Batch job {}: infrastructure failure on {}: {}", state.id, item, e);
                state.failure.fetch_add(1, Ordering::SeqCst);
                let mut abort = state.abort_error.lock().unwrap();
                if abort.is_none() {
                    *abort = Some(e.to_string());
                }
            }
            Err(e) => {
                log::warn!("Batch job {}: item {} failed: {}", state.id, item, e);
                state.failure.fetch_add(1, Ordering::SeqCst);
                state.failures.lock().unwrap().push(ItemFailure {
                    item_id: item.clone(),
                    error: e.to_string(),
                });
            }
        }

        state.processed.fetch_add(1, Ordering::SeqCst);
        *state.last_item.lock().unwrap() = Some(item);
    }
}

/// Decide the job's next state once every worker has stopped.
async fn settle(state: &Arc<JobState>, db: Option<&Db>, caches: Option<&Caches>, persist: bool) {
    let total = state.items.len() as u64;
    let processed = state.processed.load(Ordering::SeqCst);
    let aborted = state.abort_error.lock().unwrap().is_some();

    let next = if aborted {
        JobStatus::Failed
    } else if state.cancel_requested.load(Ordering::SeqCst) {
        JobStatus::Cancelled
    } else if state.pause_requested.load(Ordering::SeqCst) && processed < total {
        JobStatus::Paused
    } else if state.failure.load(Ordering::SeqCst) > 0 {
        JobStatus::Partial
    } else {
        JobStatus::Completed
    };

    if let Err(e) = state.transition(next) {
        log::error!("Batch job {}: {}", state.id, e);
        return;
    }
    log::info!(
        "Batch job {} -> {:?} ({}/{} processed, {} failed)",
        state.id,
        next,
        processed,
        total,
        state.failure.load(Ordering::SeqCst)
    );

    match next {
        JobStatus::Paused => {
            if persist {
                if let Some(db) = db {
                    if let Err(e) = store::save_checkpoint(db, &state.checkpoint()).await {
                        log::warn!("Failed to persist checkpoint for {}: {}", state.id, e);
                    }
                }
            }
        }
        _ => {
            mark_ended(state);
            if state.kind == JobKind::ExportAll
                && matches!(next, JobStatus::Completed | JobStatus::Partial)
            {
                if let Some(caches) = caches {
                    caches.clear_all();
                }
            }
            if persist {
                if let Some(db) = db {
                    if let Err(e) = store::delete_checkpoint(db, &state.id).await {
                        log::warn!("Failed to delete checkpoint for {}: {}", state.id, e);
                    }
                }
            }
        }
    }
}

fn mark_ended(state: &JobState) {
    *state.ended_at.lock().unwrap() = Some(Utc::now());
    *state.ended_instant.lock().unwrap() = Some(Instant::now());
}
