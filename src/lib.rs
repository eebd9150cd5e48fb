//! Granular confidence assessment for document extraction results.
//!
//! Takes an extraction result, the attribute schema it was extracted
//! against, and a document representation, and produces a tree of per-field
//! confidence assessments with normalized spatial evidence. The work is
//! decomposed into many small inference tasks instead of one large request
//! so that a cacheable document context is reused across calls and tasks
//! run in parallel.
//!
//! ## Architecture
//!
//! ```text
//! analyzer -> tasks -> (context feeds every task) -> scheduler
//!     -> parser (per task) -> aggregator -> outcome
//! ```
//!
//! - `analyzer` walks the schema against the result and lists the
//!   assessable leaves.
//! - `tasks` partitions the leaves into simple-batch, group, and list-item
//!   tasks; the partition is strict, so merging needs no coordination.
//! - `context` splits the prompt into a reusable static segment and a
//!   per-task dynamic segment at a single cache-point marker.
//! - `scheduler` fans tasks out to the `invoker` collaborator under a
//!   bounded worker pool with throttle retries and a run deadline.
//! - `parser` validates each response and normalizes bounding boxes to
//!   page-fractional coordinates.
//! - `aggregator` rebuilds the extraction-shaped tree, resolving
//!   confidence thresholds per leaf.
//! - `outcome` rolls per-task results into run metadata.
//!
//! The engine tolerates partial failure: a failed task leaves its fields
//! marked "assessment unavailable" while the rest of the run completes.

pub mod aggregator;
pub mod analyzer;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod invoker;
pub mod outcome;
pub mod parser;
pub mod path;
pub mod schema;
pub mod scheduler;
pub mod tasks;

pub use aggregator::{
    aggregate, AssessmentNode, LeafAssessment, ThresholdResolver, UnavailableMarker,
};
pub use analyzer::analyze;
pub use config::AssessmentConfig;
pub use context::{
    build_context, DocumentInput, DocumentPage, DynamicSegment, EncodedPage, PromptContext,
    StaticSegment, CACHE_POINT, DEFAULT_PROMPT_TEMPLATE,
};
pub use engine::{AssessmentEngine, AssessmentOutput};
pub use error::AssessmentError;
pub use invoker::{
    AssessmentInvoker, InvokeError, InvokeResponse, MockFailure, MockInvoker, TokenUsage,
};
pub use outcome::{OutcomeTracker, RunMetadata, TaskOutcome, TaskStatus};
pub use parser::{parse_response, BoundingBox, ConfidenceEntry, Geometry, ParseError};
pub use path::{LeafPath, PathStep};
pub use schema::{AttributeNode, AttributeSchema};
pub use scheduler::{run_tasks, TaskRun};
pub use tasks::{build_tasks, AssessmentTask, TaskKind};
