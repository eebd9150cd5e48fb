//! Fatal error taxonomy for the assessment engine.
//!
//! These errors surface before any task is dispatched and abort the run.
//! Per-task recoverable families live with their components: `InvokeError`
//! in `invoker`, `ParseError` in `parser`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssessmentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid {field}: {value} (must be at least 1)")]
    InvalidBatchSize { field: &'static str, value: usize },

    #[error("schema has no assessable leaf attributes")]
    EmptySchema,

    #[error("extraction result does not match schema at {path}: {detail}")]
    SchemaMismatch { path: String, detail: String },
}
