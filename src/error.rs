//! Failure classes for individual data sources.
//!
//! A source-level error never fails the run: the orchestrator records it,
//! degrades that source's metrics to absent, and keeps going.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The raw file (or ZIP member) a mandatory source needs does not exist.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The file exists but its structure does not match any known shape.
    #[error("schema mismatch in {source_name}: {detail}")]
    SchemaMismatch { source_name: String, detail: String },

    /// A row could not be mapped to a state (dropped, never fatal).
    #[error("row has no usable join key: {0}")]
    JoinKeyMissing(String),

    /// Post-hoc QA finding; informational unless strict mode is requested.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),
}

impl SourceError {
    pub fn schema(source: &str, detail: impl Into<String>) -> Self {
        SourceError::SchemaMismatch {
            source_name: source.to_string(),
            detail: detail.into(),
        }
    }
}
