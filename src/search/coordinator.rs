//! Async search coordination.
//!
//! `start` returns a search id immediately and runs the cache-or-compute
//! path on a background task, advancing the progress phases as the scorer
//! works. Deadlines produce a typed TimedOut outcome rather than blocking
//! the caller, with a best-effort cancel signal to the worker. Progress and
//! outcome state share one retention sweep so nothing leaks after clients
//! stop polling.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use uuid::Uuid;

use crate::cache::Caches;
use crate::config::SearchConfig;
use crate::db::Db;
use crate::error::{BomGraphError, Result};
use crate::progress::{ProgressRegistry, SearchProgress};
use crate::search::{engine, SearchOutcome, SearchQuery};

struct OutcomeSlot {
    cancel: Arc<AtomicBool>,
    outcome: Arc<Mutex<Option<SearchOutcome>>>,
}

/// Owns every in-flight and recently-finished async search.
pub struct SearchCoordinator {
    db: Arc<Db>,
    caches: Arc<Caches>,
    config: SearchConfig,
    progress: ProgressRegistry,
    outcomes: DashMap<String, OutcomeSlot>,
}

impl SearchCoordinator {
    pub fn new(db: Arc<Db>, caches: Arc<Caches>, config: SearchConfig) -> Self {
        let retention = Duration::from_secs(config.progress_retention_secs);
        Self {
            db,
            caches,
            config,
            progress: ProgressRegistry::new(retention),
            outcomes: DashMap::new(),
        }
    }

    /// Start a search in the background and return its id immediately.
    /// The first poll before the worker runs reports Initializing at 0%.
    pub fn start(&self, query: SearchQuery, deadline: Duration) -> String {
        let search_id = Uuid::new_v4().to_string();
        let handle = self.progress.register(&search_id);
        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = Arc::new(Mutex::new(None));
        self.outcomes.insert(
            search_id.clone(),
            OutcomeSlot {
                cancel: Arc::clone(&cancel),
                outcome: Arc::clone(&outcome),
            },
        );

        let db = Arc::clone(&self.db);
        let caches = Arc::clone(&self.caches);
        let config = self.config.clone();
        let id_for_log = search_id.clone();
        tokio::spawn(async move {
            let search_future =
                engine::search(&db, &caches, &config, &query, Some(&handle), Some(&cancel));
            let result = match tokio::time::timeout(deadline, search_future).await {
                Ok(result) => result,
                Err(_) => {
                    // Signal the worker; the computation may still be shared
                    // by a coalesced caller, so this is advisory only.
                    cancel.store(true, Ordering::Relaxed);
                    handle.set_warning("deadline exceeded before the search finished");
                    log::warn!("Async search {} exceeded its deadline", id_for_log);
                    SearchOutcome::timed_out(deadline.as_millis() as u64)
                }
            };
            log::debug!(
                "Async search {} finished with status {:?}",
                id_for_log,
                result.status
            );
            *outcome.lock().unwrap() = Some(result);
            handle.mark_complete();
        });

        search_id
    }

    /// Progress snapshot, None for unknown or already-swept ids; callers
    /// map that to 404, distinct from a 0% snapshot.
    pub fn poll(&self, search_id: &str) -> Option<SearchProgress> {
        self.progress.get(search_id)
    }

    /// Terminal outcome. `Ok(None)` while the search is still running;
    /// `SearchNotFound` for unknown or swept ids.
    pub fn result(&self, search_id: &str) -> Result<Option<SearchOutcome>> {
        match self.outcomes.get(search_id) {
            None => Err(BomGraphError::SearchNotFound(search_id.to_string())),
            Some(slot) => Ok(slot.outcome.lock().unwrap().clone()),
        }
    }

    /// Request cancellation; the worker observes the flag between
    /// candidates.
    pub fn cancel(&self, search_id: &str) -> Result<()> {
        match self.outcomes.get(search_id) {
            None => Err(BomGraphError::SearchNotFound(search_id.to_string())),
            Some(slot) => {
                slot.cancel.store(true, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Drop searches past the retention window.
    pub fn sweep(&self) {
        for id in self.progress.sweep() {
            self.outcomes.remove(&id);
        }
    }

    /// Background sweep loop. Holds only a weak reference so dropping the
    /// coordinator stops the task.
    pub fn spawn_sweeper(coordinator: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(coordinator);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match weak.upgrade() {
                    Some(coordinator) => coordinator.sweep(),
                    None => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, ScoringWeights};
    use crate::progress::SearchPhase;
    use crate::search::{parse_spec_text, SearchStatus};
    use crate::store::tests::test_db;
    use crate::store::upsert_item;
    use tempfile::TempDir;

    fn search_config() -> SearchConfig {
        SearchConfig {
            default_limit: 10,
            min_score: 0.3,
            numeric_decay: 0.25,
            progress_retention_secs: 60,
            weights: ScoringWeights {
                series: 0.25,
                cylinder_type: 0.20,
                bore: 0.20,
                stroke: 0.15,
                rod_end_type: 0.10,
                installation_type: 0.10,
            },
        }
    }

    async fn coordinator() -> (Arc<SearchCoordinator>, TempDir) {
        let (db, temp) = test_db().await;
        upsert_item(
            &db,
            "CYL-1",
            "Cylinder",
            Some("series=12;type=F;bore=050;stroke=0146;rodEndType=Y"),
            None,
        )
        .await
        .unwrap();
        let caches = Arc::new(Caches::new(&CacheConfig {
            capacity: 100,
            ttl_secs: 60,
        }));
        (
            Arc::new(SearchCoordinator::new(
                Arc::new(db),
                caches,
                search_config(),
            )),
            temp,
        )
    }

    fn query() -> SearchQuery {
        SearchQuery::new(parse_spec_text("series=12;type=F;bore=050"))
    }

    async fn await_outcome(
        coordinator: &SearchCoordinator,
        search_id: &str,
    ) -> SearchOutcome {
        for _ in 0..200 {
            if let Some(outcome) = coordinator.result(search_id).unwrap() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("search {} never finished", search_id);
    }

    #[tokio::test]
    async fn test_poll_before_worker_runs_is_initializing() {
        let (coordinator, _temp) = coordinator().await;
        // Current-thread runtime: the spawned worker cannot run until we
        // await, so this poll observes the pristine state.
        let id = coordinator.start(query(), Duration::from_secs(5));
        let progress = coordinator.poll(&id).unwrap();
        assert_eq!(progress.current_phase, SearchPhase::Initializing);
        assert_eq!(progress.percent_complete, 0.0);
    }

    #[tokio::test]
    async fn test_async_search_completes() {
        let (coordinator, _temp) = coordinator().await;
        let id = coordinator.start(query(), Duration::from_secs(5));

        let outcome = await_outcome(&coordinator, &id).await;
        assert_eq!(outcome.status, SearchStatus::Completed);
        assert_eq!(outcome.matches[0].item_code, "CYL-1");

        let progress = coordinator.poll(&id).unwrap();
        assert_eq!(progress.current_phase, SearchPhase::Finalizing);
        assert_eq!(progress.processed_items, progress.total_items);
    }

    #[tokio::test]
    async fn test_zero_deadline_times_out() {
        let (coordinator, _temp) = coordinator().await;
        let id = coordinator.start(query(), Duration::ZERO);

        let outcome = await_outcome(&coordinator, &id).await;
        assert_eq!(outcome.status, SearchStatus::TimedOut);
        let progress = coordinator.poll(&id).unwrap();
        assert!(progress.warning_message.is_some());
    }

    #[tokio::test]
    async fn test_unknown_id_distinct_from_zero_percent() {
        let (coordinator, _temp) = coordinator().await;
        assert!(coordinator.poll("nope").is_none());
        assert!(matches!(
            coordinator.result("nope"),
            Err(BomGraphError::SearchNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_result_none_while_running() {
        let (coordinator, _temp) = coordinator().await;
        let id = coordinator.start(query(), Duration::from_secs(5));
        // Worker has not run yet on the current-thread runtime
        assert!(coordinator.result(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_finished_search() {
        let (db, _temp) = test_db().await;
        let caches = Arc::new(Caches::new(&CacheConfig {
            capacity: 10,
            ttl_secs: 60,
        }));
        let mut config = search_config();
        config.progress_retention_secs = 0;
        let coordinator = SearchCoordinator::new(Arc::new(db), caches, config);

        let id = coordinator.start(query(), Duration::from_secs(5));
        let _ = await_outcome(&coordinator, &id).await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.sweep();
        assert!(coordinator.poll(&id).is_none());
        assert!(coordinator.result(&id).is_err());
    }
}
