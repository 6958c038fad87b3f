use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::fingerprint::SpecMap;

pub mod coordinator;
pub mod engine;
pub mod scorer;

/// One catalog match with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub item_code: String,
    pub item_name: String,
    pub score: f64,
    /// 1-indexed position after sorting.
    pub rank: usize,
    /// Catalog insertion time, used for recency tie-breaks.
    pub created_at: String,
}

/// Terminal status of a search. "No matches" is a Completed outcome with an
/// empty list; Failed and TimedOut are never masked as empty results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchStatus {
    Completed,
    Failed,
    TimedOut,
}

/// The single result shape shared by synchronous and async search paths.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub status: SearchStatus,
    pub matches: Vec<MatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl SearchOutcome {
    pub fn completed(matches: Vec<MatchResult>, elapsed_ms: u64) -> Self {
        Self {
            status: SearchStatus::Completed,
            matches,
            error: None,
            elapsed_ms,
        }
    }

    pub fn failed(error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            status: SearchStatus::Failed,
            matches: Vec::new(),
            error: Some(error.into()),
            elapsed_ms,
        }
    }

    pub fn timed_out(elapsed_ms: u64) -> Self {
        Self {
            status: SearchStatus::TimedOut,
            matches: Vec::new(),
            error: Some("search deadline exceeded".to_string()),
            elapsed_ms,
        }
    }
}

/// A similarity search request: the query spec plus caller-supplied
/// exclusion threshold and result limit (None = configured defaults).
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub spec: SpecMap,
    pub min_score: Option<f64>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new(spec: SpecMap) -> Self {
        Self {
            spec,
            min_score: None,
            limit: None,
        }
    }
}

fn spec_pair_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // key=value or key:value pairs, separated by ; or ,
        Regex::new(r"(?i)([a-z][a-z0-9_]*)\s*[:=]\s*([^;,]+)").expect("spec pair regex")
    })
}

/// Parse a raw catalog spec_text into a specification map.
///
/// Accepts `key=value` / `key:value` pairs separated by `;` or `,`.
/// Malformed fragments are skipped rather than failing the whole entry;
/// ERP spec strings are frequently hand-edited.
pub fn parse_spec_text(text: &str) -> SpecMap {
    let mut map = SpecMap::new();
    for capture in spec_pair_regex().captures_iter(text) {
        let key = capture[1].to_string();
        let value = capture[2].trim().to_string();
        if !value.is_empty() {
            map.insert(key, value);
        }
    }
    map
}
