use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod manager;

pub use manager::BatchJobManager;

use crate::error::{BomGraphError, Result};

/// What a batch job does to each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    ExportAll,
    BatchSearch,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ExportAll => "export_all",
            JobKind::BatchSearch => "batch_search",
        }
    }

    pub fn parse(s: &str) -> Result<JobKind> {
        match s {
            "export_all" => Ok(JobKind::ExportAll),
            "batch_search" => Ok(JobKind::BatchSearch),
            other => Err(BomGraphError::Parse(format!("unknown job kind '{}'", other))),
        }
    }
}

/// Batch job lifecycle. Completed, Partial, Failed and Cancelled are
/// terminal; Partial means the job ran to completion with per-item
/// failures, which is not the Failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Paused,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Legal state-machine edges. Everything else is a programming error
    /// surfaced as InvalidInput by the manager.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Processing, Paused)
                | (Processing, Completed)
                | (Processing, Partial)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Paused, Processing)
                | (Paused, Cancelled)
        )
    }
}

/// One item that failed inside a batch; never aborts sibling items.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub item_id: String,
    pub error: String,
}

/// Point-in-time view of a batch job returned to polling clients.
#[derive(Debug, Clone, Serialize)]
pub struct BatchJobSnapshot {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total_items: u64,
    pub processed_items: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub percent_complete: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_processed_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub item_failures: Vec<ItemFailure>,
}
