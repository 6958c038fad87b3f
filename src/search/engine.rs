//! Synchronous search and export paths.
//!
//! `search` runs the cache-or-compute pipeline on the calling task: on a
//! miss the whole catalog is scored once and the full ranking cached, so a
//! repeat query with a different threshold or limit is a cache hit.
//! Failures degrade to a typed [`SearchOutcome`] instead of escaping, so
//! the synchronous and async paths share one result shape.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::bom;
use crate::cache::Caches;
use crate::config::SearchConfig;
use crate::db::Db;
use crate::error::{BomGraphError, Result};
use crate::fingerprint::{self, Fingerprint, SpecMap};
use crate::ontology::{OntologyEngine, TargetSyntax};
use crate::progress::{ProgressHandle, SearchPhase};
use crate::search::scorer::{self, ScoringParams};
use crate::search::{self, MatchResult, SearchOutcome, SearchQuery};
use crate::store;

/// Score every catalog entry against the query spec and return the full
/// ranking, sorted by score, then recency, then item code. Candidates that
/// score zero are dropped; the caller-supplied threshold is applied later so
/// the ranking is reusable across thresholds.
///
/// `cancel` is a best-effort signal checked between candidates.
pub async fn score_catalog(
    db: &Db,
    params: &ScoringParams,
    spec: &SpecMap,
    progress: Option<&ProgressHandle>,
    cancel: Option<&AtomicBool>,
) -> Result<Vec<MatchResult>> {
    if let Some(p) = progress {
        p.set_phase(SearchPhase::Filtering);
    }
    let catalog = store::list_catalog(db).await?;
    if let Some(p) = progress {
        p.set_total(catalog.len() as u64);
        p.set_phase(SearchPhase::Calculating);
    }
    log::debug!("Scoring {} catalog entries", catalog.len());

    let mut matches = Vec::new();
    for entry in catalog {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(BomGraphError::Timeout("search cancelled".to_string()));
            }
        }

        let candidate = search::parse_spec_text(entry.spec_text.as_deref().unwrap_or(""));
        let score = scorer::score(spec, &candidate, params);
        if let Some(p) = progress {
            p.record_processed();
        }
        if score > 0.0 {
            if let Some(p) = progress {
                p.record_match();
            }
            matches.push(MatchResult {
                item_code: entry.item_code,
                item_name: entry.item_name,
                score,
                rank: 0,
                created_at: entry.created_at,
            });
        }
    }

    if let Some(p) = progress {
        p.set_phase(SearchPhase::Sorting);
    }
    sort_and_rank(&mut matches);
    Ok(matches)
}

/// Deterministic ordering: score descending, newer catalog entries first on
/// ties, item code as the final tie-break. Ranks are 1-indexed.
fn sort_and_rank(matches: &mut [MatchResult]) {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.item_code.cmp(&b.item_code))
    });
    for (idx, result) in matches.iter_mut().enumerate() {
        result.rank = idx + 1;
    }
}

/// Apply the caller's exclusion threshold and limit to a cached ranking,
/// re-assigning ranks over the filtered list.
fn apply_query_bounds(
    ranking: &[MatchResult],
    min_score: f64,
    limit: usize,
) -> Vec<MatchResult> {
    ranking
        .iter()
        .filter(|m| m.score >= min_score)
        .take(limit)
        .cloned()
        .enumerate()
        .map(|(idx, mut m)| {
            m.rank = idx + 1;
            m
        })
        .collect()
}

/// Synchronous similarity search with caching. Never returns an error:
/// failures become a `Failed` outcome and cancellation a `TimedOut` one.
pub async fn search(
    db: &Db,
    caches: &Caches,
    config: &SearchConfig,
    query: &SearchQuery,
    progress: Option<&ProgressHandle>,
    cancel: Option<&AtomicBool>,
) -> SearchOutcome {
    let start = Instant::now();
    let params = ScoringParams::from(config);
    let key = fingerprint::encode(&query.spec);

    let ranking = caches
        .search
        .get_or_compute(&key, || async {
            let matches = score_catalog(db, &params, &query.spec, progress, cancel).await?;
            Ok(Arc::new(matches))
        })
        .await;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    match ranking {
        Ok(ranking) => {
            if let Some(p) = progress {
                p.set_phase(SearchPhase::Finalizing);
            }
            let min_score = query.min_score.unwrap_or(config.min_score);
            let limit = query.limit.unwrap_or(config.default_limit);
            let matches = apply_query_bounds(&ranking, min_score, limit);
            log::debug!(
                "Search {} -> {} of {} ranked matches in {}ms",
                key.canonical(),
                matches.len(),
                ranking.len(),
                elapsed_ms
            );
            SearchOutcome::completed(matches, elapsed_ms)
        }
        Err(BomGraphError::Timeout(_)) => SearchOutcome::timed_out(elapsed_ms),
        Err(e) => {
            log::warn!("Search failed for {}: {}", key.canonical(), e);
            SearchOutcome::failed(e.to_string(), elapsed_ms)
        }
    }
}

/// Cache key for an export: item code, syntax and depth bound all shape the
/// rendered document.
pub fn export_fingerprint(item_code: &str, syntax: TargetSyntax, max_depth: usize) -> Fingerprint {
    Fingerprint::of_label(&format!("{}/{}/depth={}", item_code, syntax, max_depth))
}

/// Resolve one item and render it through the ontology engine, cached in
/// the export region. Resolution or render errors propagate and are never
/// cached.
pub async fn export(
    db: &Db,
    engine: &dyn OntologyEngine,
    caches: &Caches,
    item_code: &str,
    syntax: TargetSyntax,
    max_depth: usize,
) -> Result<Arc<String>> {
    let key = export_fingerprint(item_code, syntax, max_depth);
    caches
        .export
        .get_or_compute(&key, || async {
            let tree = bom::resolve(db, item_code, max_depth).await?;
            log::debug!(
                "Rendering {} ({} nodes) as {}",
                item_code,
                tree.node_count(),
                syntax
            );
            let document = engine.render(&tree, syntax)?;
            Ok(Arc::new(document))
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, ScoringWeights};
    use crate::ontology::GraphRenderer;
    use crate::search::SearchStatus;
    use crate::store::tests::test_db;
    use crate::store::{insert_component, upsert_item};

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

    fn caches() -> Caches {
        Caches::new(&CacheConfig {
            capacity: 100,
            ttl_secs: 60,
        })
    }

    async fn seed_catalog(db: &Db) {
        upsert_item(
            db,
            "CYL-EXACT",
            "Exact match",
            Some("series=12;type=F;bore=050;stroke=0146;rodEndType=Y"),
            None,
        )
        .await
        .unwrap();
        upsert_item(
            db,
            "CYL-NEAR",
            "One bore off",
            Some("series=12;type=F;bore=063;stroke=0146;rodEndType=Y"),
            None,
        )
        .await
        .unwrap();
        upsert_item(
            db,
            "CYL-OTHER",
            "Unrelated",
            Some("series=90;type=Z;bore=400;stroke=9000;rodEndType=Q"),
            None,
        )
        .await
        .unwrap();
    }

    fn reference_query() -> SearchQuery {
        SearchQuery::new(search::parse_spec_text(
            "series=12;type=F;bore=050;stroke=0146;rodEndType=Y",
        ))
    }

    #[tokio::test]
    async fn test_search_ranks_exact_above_near() {
        let (db, _temp) = test_db().await;
        seed_catalog(&db).await;
        let caches = caches();

        let outcome = search(&db, &caches, &search_config(), &reference_query(), None, None).await;
        assert_eq!(outcome.status, SearchStatus::Completed);
        assert!(outcome.matches.len() >= 2);
        assert_eq!(outcome.matches[0].item_code, "CYL-EXACT");
        assert!((outcome.matches[0].score - 1.0).abs() < 1e-9);
        assert_eq!(outcome.matches[1].item_code, "CYL-NEAR");
        assert!(outcome.matches[1].score < 1.0);
        assert_eq!(outcome.matches[0].rank, 1);
        assert_eq!(outcome.matches[1].rank, 2);
    }

    #[tokio::test]
    async fn test_search_threshold_excludes() {
        let (db, _temp) = test_db().await;
        seed_catalog(&db).await;
        let caches = caches();

        let mut query = reference_query();
        query.min_score = Some(0.99);
        let outcome = search(&db, &caches, &search_config(), &query, None, None).await;
        assert_eq!(outcome.status, SearchStatus::Completed);
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].item_code, "CYL-EXACT");
    }

    #[tokio::test]
    async fn test_search_empty_catalog_is_completed_not_failed() {
        let (db, _temp) = test_db().await;
        let caches = caches();

        let outcome = search(&db, &caches, &search_config(), &reference_query(), None, None).await;
        assert_eq!(outcome.status, SearchStatus::Completed);
        assert!(outcome.matches.is_empty());
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_search_reuses_cached_ranking_across_limits() {
        let (db, _temp) = test_db().await;
        seed_catalog(&db).await;
        let caches = caches();
        let config = search_config();

        let first = search(&db, &caches, &config, &reference_query(), None, None).await;
        assert_eq!(first.status, SearchStatus::Completed);

        let mut limited = reference_query();
        limited.limit = Some(1);
        let second = search(&db, &caches, &config, &limited, None, None).await;
        assert_eq!(second.matches.len(), 1);

        // Same spec fingerprint: the second call hit the cache
        assert!(caches.search.stats().hit_count >= 1);
    }

    #[tokio::test]
    async fn test_cancelled_search_times_out() {
        let (db, _temp) = test_db().await;
        seed_catalog(&db).await;
        let caches = caches();

        let cancel = AtomicBool::new(true);
        let outcome = search(
            &db,
            &caches,
            &search_config(),
            &reference_query(),
            None,
            Some(&cancel),
        )
        .await;
        assert_eq!(outcome.status, SearchStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_export_caches_document() {
        let (db, _temp) = test_db().await;
        upsert_item(&db, "A", "Assembly", None, None).await.unwrap();
        upsert_item(&db, "B", "Part", None, None).await.unwrap();
        insert_component(&db, "A", "B", 2.0, None, None, None, 0)
            .await
            .unwrap();
        let caches = caches();

        let doc = export(&db, &GraphRenderer, &caches, "A", TargetSyntax::Turtle, 0)
            .await
            .unwrap();
        assert!(doc.contains("bom:itemCode \"A\""));

        let again = export(&db, &GraphRenderer, &caches, "A", TargetSyntax::Turtle, 0)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&doc, &again));
        assert!(caches.export.stats().hit_count >= 1);
    }

    #[tokio::test]
    async fn test_export_unknown_item_propagates() {
        let (db, _temp) = test_db().await;
        let caches = caches();
        let err = export(&db, &GraphRenderer, &caches, "NOPE", TargetSyntax::NTriples, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, BomGraphError::ItemNotFound(_)));
    }
}
