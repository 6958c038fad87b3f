pub mod result_cache;

pub use result_cache::{RegionStats, ResultCache};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::search::MatchResult;

/// Process-wide cache statistics across all regions, the shape exposed by
/// the cache-management surface.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatistics {
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    pub eviction_count: u64,
    pub average_load_time_ms: f64,
    pub size_per_region: BTreeMap<String, usize>,
}

/// The named cache regions: similarity-search rankings and rendered export
/// documents. Bundled so "anything that could change what a future search
/// returns" can invalidate everything in one call.
pub struct Caches {
    pub search: ResultCache<Arc<Vec<MatchResult>>>,
    pub export: ResultCache<Arc<String>>,
}

impl Caches {
    pub fn new(config: &CacheConfig) -> Self {
        let ttl = Duration::from_secs(config.ttl_secs);
        Self {
            search: ResultCache::new(config.capacity, ttl),
            export: ResultCache::new(config.capacity, ttl),
        }
    }

    /// Invalidate every region. Called after any operation that can change
    /// rankings: a new export, a knowledge-base cleanup, an entry update.
    pub fn clear_all(&self) {
        self.search.clear();
        self.export.clear();
        log::info!("All cache regions cleared");
    }

    pub fn statistics(&self) -> CacheStatistics {
        let regions = [("search", self.search.stats()), ("export", self.export.stats())];

        let mut size_per_region = BTreeMap::new();
        let mut hits = 0;
        let mut misses = 0;
        let mut evictions = 0;
        let mut load_ms_weighted = 0.0;
        let mut load_regions = 0u64;
        for (name, stats) in &regions {
            size_per_region.insert((*name).to_string(), stats.size);
            hits += stats.hit_count;
            misses += stats.miss_count;
            evictions += stats.eviction_count;
            if stats.average_load_time_ms > 0.0 {
                load_ms_weighted += stats.average_load_time_ms;
                load_regions += 1;
            }
        }

        CacheStatistics {
            hit_count: hits,
            miss_count: misses,
            hit_rate: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
            eviction_count: evictions,
            average_load_time_ms: if load_regions == 0 {
                0.0
            } else {
                load_ms_weighted / load_regions as f64
            },
            size_per_region,
        }
    }
}
