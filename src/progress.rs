//! In-memory, job-scoped progress tracking for async searches.
//!
//! One [`ProgressHandle`] exists per in-flight search id. Counters only
//! ever increase, so polling clients never observe progress moving
//! backwards. Completed entries stay pollable for a retention window and
//! are then removed by [`ProgressRegistry::sweep`]; an unknown id is a
//! distinct answer from "0% complete".

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Phases an async search advances through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchPhase {
    Initializing,
    Filtering,
    Calculating,
    Sorting,
    Finalizing,
}

/// Point-in-time progress snapshot returned to polling clients.
#[derive(Debug, Clone, Serialize)]
pub struct SearchProgress {
    pub total_items: u64,
    pub processed_items: u64,
    pub found_matches: u64,
    pub percent_complete: f64,
    pub current_phase: SearchPhase,
    pub elapsed_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_message: Option<String>,
}

/// Shared mutable progress state for one search.
pub struct ProgressHandle {
    total: AtomicU64,
    processed: AtomicU64,
    found: AtomicU64,
    phase: Mutex<SearchPhase>,
    warning: Mutex<Option<String>>,
    started: Instant,
    completed_at: Mutex<Option<Instant>>,
}

impl ProgressHandle {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            found: AtomicU64::new(0),
            phase: Mutex::new(SearchPhase::Initializing),
            warning: Mutex::new(None),
            started: Instant::now(),
            completed_at: Mutex::new(None),
        }
    }

    pub fn set_phase(&self, phase: SearchPhase) {
        *self.phase.lock().unwrap() = phase;
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// Record one processed candidate. Monotonic.
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one candidate that passed scoring. Monotonic.
    pub fn record_match(&self) {
        self.found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_warning(&self, message: impl Into<String>) {
        *self.warning.lock().unwrap() = Some(message.into());
    }

    /// Mark the search terminal; starts the retention clock.
    pub fn mark_complete(&self) {
        self.set_phase(SearchPhase::Finalizing);
        let mut completed = self.completed_at.lock().unwrap();
        if completed.is_none() {
            *completed = Some(Instant::now());
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.lock().unwrap().is_some()
    }

    fn completed_longer_ago_than(&self, retention: Duration) -> bool {
        match *self.completed_at.lock().unwrap() {
            Some(at) => at.elapsed() > retention,
            None => false,
        }
    }

    pub fn snapshot(&self) -> SearchProgress {
        let total = self.total.load(Ordering::Relaxed);
        let processed = self.processed.load(Ordering::Relaxed);
        let percent = if total == 0 {
            0.0
        } else {
            (processed as f64 / total as f64) * 100.0
        };
        SearchProgress {
            total_items: total,
            processed_items: processed,
            found_matches: self.found.load(Ordering::Relaxed),
            percent_complete: percent,
            current_phase: *self.phase.lock().unwrap(),
            elapsed_time_ms: self.started.elapsed().as_millis() as u64,
            warning_message: self.warning.lock().unwrap().clone(),
        }
    }
}

/// Registry of per-search progress state with bounded lifetime.
pub struct ProgressRegistry {
    states: DashMap<String, Arc<ProgressHandle>>,
    retention: Duration,
}

impl ProgressRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            states: DashMap::new(),
            retention,
        }
    }

    /// Register a new search id and return its handle.
    pub fn register(&self, search_id: &str) -> Arc<ProgressHandle> {
        let handle = Arc::new(ProgressHandle::new());
        self.states.insert(search_id.to_string(), Arc::clone(&handle));
        handle
    }

    /// Snapshot for a search id, None when unknown or already swept.
    pub fn get(&self, search_id: &str) -> Option<SearchProgress> {
        self.states.get(search_id).map(|h| h.snapshot())
    }

    pub fn handle(&self, search_id: &str) -> Option<Arc<ProgressHandle>> {
        self.states.get(search_id).map(|h| Arc::clone(&h))
    }

    /// Drop completed entries past the retention window. Returns the ids
    /// removed so owners of adjacent per-search state can drop theirs too.
    pub fn sweep(&self) -> Vec<String> {
        let expired: Vec<String> = self
            .states
            .iter()
            .filter(|entry| entry.value().completed_longer_ago_than(self.retention))
            .map(|entry| entry.key().clone())
            .collect();
        for id in &expired {
            self.states.remove(id);
            log::debug!("Swept search progress {}", id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot() {
        let registry = ProgressRegistry::new(Duration::from_secs(60));
        let handle = registry.register("s1");

        let snap = handle.snapshot();
        assert_eq!(snap.current_phase, SearchPhase::Initializing);
        assert_eq!(snap.percent_complete, 0.0);
        assert_eq!(snap.processed_items, 0);
        assert!(snap.warning_message.is_none());
    }

    #[test]
    fn test_percent_tracks_processed() {
        let registry = ProgressRegistry::new(Duration::from_secs(60));
        let handle = registry.register("s1");
        handle.set_total(4);
        handle.record_processed();
        handle.record_processed();
        handle.record_match();

        let snap = handle.snapshot();
        assert_eq!(snap.processed_items, 2);
        assert_eq!(snap.found_matches, 1);
        assert!((snap.percent_complete - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_id_is_none() {
        let registry = ProgressRegistry::new(Duration::from_secs(60));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_sweep_only_removes_expired_completed() {
        let registry = ProgressRegistry::new(Duration::from_millis(0));
        let done = registry.register("done");
        let _running = registry.register("running");
        done.mark_complete();

        // Zero retention: completed entry is immediately sweepable
        std::thread::sleep(Duration::from_millis(5));
        let removed = registry.sweep();
        assert_eq!(removed, vec!["done".to_string()]);
        assert!(registry.get("done").is_none());
        assert!(registry.get("running").is_some());
    }

    #[test]
    fn test_mark_complete_idempotent() {
        let registry = ProgressRegistry::new(Duration::from_secs(60));
        let handle = registry.register("s1");
        handle.mark_complete();
        let first = handle.is_complete();
        handle.mark_complete();
        assert!(first && handle.is_complete());
    }
}
