use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bomgraph: BomGraphConfig,
    pub resolver: ResolverConfig,
    pub search: SearchConfig,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
}

/// Core paths and logging
#[derive(Debug, Clone, Deserialize)]
pub struct BomGraphConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Hierarchy resolution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// Depth bound for full resolution. 0 means unbounded (cycle-guarded).
    #[serde(default)]
    pub default_max_depth: usize,
}

/// Similarity search configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub default_limit: usize,
    /// Candidates scoring below this are excluded. Callers may override per search.
    pub min_score: f64,
    /// Relative-difference scale for numeric field decay. Larger = more tolerant.
    #[serde(default = "default_numeric_decay")]
    pub numeric_decay: f64,
    /// Retention window for async search progress after completion, in seconds.
    #[serde(default = "default_progress_retention_secs")]
    pub progress_retention_secs: u64,
    pub weights: ScoringWeights,
}

/// Per-field scoring weights. The business tunes these per product family,
/// so they are configuration rather than constants.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringWeights {
    pub series: f64,
    pub cylinder_type: f64,
    pub bore: f64,
    pub stroke: f64,
    pub rod_end_type: f64,
    pub installation_type: f64,
}

/// Result cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Entries expire after this many seconds regardless of LRU position.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

/// Batch processing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Terminal jobs remain pollable for this many seconds before being swept.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Persist pause checkpoints to the database so a paused job can be
    /// resumed after a process restart.
    #[serde(default)]
    pub persist_checkpoints: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    600
}

fn default_numeric_decay() -> f64 {
    0.25
}

fn default_progress_retention_secs() -> u64 {
    300
}

fn default_worker_count() -> usize {
    4
}

fn default_retention_secs() -> u64 {
    300
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in BOMGRAPH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignore errors - file is optional)
        let _ = dotenv::dotenv();

        let config_path = std::env::var("BOMGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .context("Failed to parse config.toml")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.search.default_limit == 0 {
            anyhow::bail!("search.default_limit must be greater than 0");
        }

        if self.search.min_score < 0.0 || self.search.min_score > 1.0 {
            anyhow::bail!("search.min_score must be between 0.0 and 1.0");
        }

        if self.search.numeric_decay <= 0.0 {
            anyhow::bail!("search.numeric_decay must be greater than 0");
        }

        let w = &self.search.weights;
        let weights = [
            ("series", w.series),
            ("cylinder_type", w.cylinder_type),
            ("bore", w.bore),
            ("stroke", w.stroke),
            ("rod_end_type", w.rod_end_type),
            ("installation_type", w.installation_type),
        ];
        for (name, value) in weights {
            if value < 0.0 {
                anyhow::bail!("search.weights.{} must not be negative", name);
            }
        }
        if weights.iter().map(|(_, v)| v).sum::<f64>() <= 0.0 {
            anyhow::bail!("search.weights must not all be zero");
        }

        if self.cache.capacity == 0 {
            anyhow::bail!("cache.capacity must be greater than 0");
        }

        if self.batch.worker_count == 0 {
            anyhow::bail!("batch.worker_count must be greater than 0");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.bomgraph.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn test_config_toml() -> &'static str {
        r#"
[bomgraph]
db_path = "./test.db"
log_level = "debug"

[resolver]
default_max_depth = 0

[search]
default_limit = 10
min_score = 0.3
numeric_decay = 0.25

[search.weights]
series = 0.25
cylinder_type = 0.20
bore = 0.20
stroke = 0.15
rod_end_type = 0.10
installation_type = 0.10

[cache]
capacity = 500
ttl_secs = 120

[batch]
worker_count = 2
retention_secs = 60
persist_checkpoints = true
"#
    }

    fn with_config_env(config_path: &std::path::Path, f: impl FnOnce()) {
        let original = std::env::var("BOMGRAPH_CONFIG").ok();
        std::env::set_var("BOMGRAPH_CONFIG", config_path.to_str().unwrap());
        f();
        std::env::remove_var("BOMGRAPH_CONFIG");
        if let Some(val) = original {
            std::env::set_var("BOMGRAPH_CONFIG", val);
        }
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, test_config_toml()).unwrap();
        with_config_env(&config_path, || {
            let config = Config::load();
            assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
            let config = config.unwrap();
            assert_eq!(config.bomgraph.log_level, "debug");
            assert_eq!(config.search.default_limit, 10);
            assert_eq!(config.cache.capacity, 500);
            assert_eq!(config.batch.worker_count, 2);
            assert!(config.batch.persist_checkpoints);
        });
    }

    #[test]
    fn test_config_defaults_applied() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        // Minimal config: optional sections fall back to defaults
        let minimal = r#"
[bomgraph]
db_path = "./test.db"

[resolver]

[search]
default_limit = 5
min_score = 0.5

[search.weights]
series = 0.25
cylinder_type = 0.20
bore = 0.20
stroke = 0.15
rod_end_type = 0.10
installation_type = 0.10

[cache]

[batch]
"#;
        fs::write(&config_path, minimal).unwrap();
        with_config_env(&config_path, || {
            let config = Config::load().unwrap();
            assert_eq!(config.bomgraph.log_level, "info");
            assert_eq!(config.cache.capacity, 1000);
            assert_eq!(config.cache.ttl_secs, 600);
            assert_eq!(config.batch.worker_count, 4);
            assert!(!config.batch.persist_checkpoints);
            assert_eq!(config.resolver.default_max_depth, 0);
        });
    }

    #[test]
    fn test_config_rejects_bad_min_score() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let bad = test_config_toml().replace("min_score = 0.3", "min_score = 1.5");
        fs::write(&config_path, bad).unwrap();
        with_config_env(&config_path, || {
            let config = Config::load();
            assert!(config.is_err());
            assert!(config.unwrap_err().to_string().contains("min_score"));
        });
    }

    #[test]
    fn test_config_rejects_zero_weights() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let bad = test_config_toml()
            .replace("series = 0.25", "series = 0.0")
            .replace("cylinder_type = 0.20", "cylinder_type = 0.0")
            .replace("bore = 0.20", "bore = 0.0")
            .replace("stroke = 0.15", "stroke = 0.0")
            .replace("rod_end_type = 0.10", "rod_end_type = 0.0")
            .replace("installation_type = 0.10", "installation_type = 0.0");
        fs::write(&config_path, bad).unwrap();
        with_config_env(&config_path, || {
            let config = Config::load();
            assert!(config.is_err());
            assert!(config.unwrap_err().to_string().contains("weights"));
        });
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("BOMGRAPH_CONFIG").ok();
        std::env::set_var("BOMGRAPH_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("BOMGRAPH_CONFIG");
        if let Some(v) = original {
            std::env::set_var("BOMGRAPH_CONFIG", v);
        }
    }
}
