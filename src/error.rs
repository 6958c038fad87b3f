use thiserror::Error;

/// Main error type for bomgraph
#[derive(Error, Debug)]
pub enum BomGraphError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Item master record not found
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// Batch job id unknown (never started, or past its retention window)
    #[error("Batch job not found: {0}")]
    JobNotFound(String),

    /// Async search id unknown (never started, or past its retention window)
    #[error("Search not found: {0}")]
    SearchNotFound(String),

    /// A BOM component relation loops back to one of its ancestors.
    /// Carries the offending path for diagnostics, root first.
    #[error("Cycle detected in BOM structure: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    /// Deadline exceeded on a synchronous or async path
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Batch completed, but one or more items failed
    #[error("Batch completed with {failed} of {total} items failed")]
    PartialFailure { failed: u64, total: u64 },

    /// Unrecoverable infrastructure error (data store unreachable, ontology
    /// engine failure). The only condition that moves a batch job to Failed.
    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),

    /// Parse errors (spec text, dates, checkpoint payloads)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BomGraphError {
    /// Whether this error should abort a whole batch job rather than being
    /// recorded as a single item failure.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            BomGraphError::Infrastructure(_) | BomGraphError::Database(_) | BomGraphError::Io(_)
        )
    }
}

/// Convenient Result type using BomGraphError
pub type Result<T> = std::result::Result<T, BomGraphError>;
