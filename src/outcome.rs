//! Task outcomes and run metadata.
//!
//! Each task ends in exactly one outcome record; the tracker rolls the
//! records up into run-level metadata returned alongside the aggregate.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::invoker::TokenUsage;

/// Terminal status of one assessment task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of one task's execution.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub kind: &'static str,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Invocations made, retries included.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Run-level rollup returned with the aggregated assessment.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub tasks_total: u32,
    pub tasks_successful: u32,
    pub tasks_failed: u32,
    pub elapsed_ms: u64,
    /// True when the multi-task partition ran; false when assessment was
    /// skipped (disabled) and a single-request fallback applies upstream.
    pub granular: bool,
    pub started_at: DateTime<Utc>,
}

/// Accumulates task outcomes for one run.
pub struct OutcomeTracker {
    run_id: String,
    started_at: DateTime<Utc>,
    started: Instant,
    outcomes: Vec<TaskOutcome>,
}

impl OutcomeTracker {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: TaskOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }

    /// Close the run and produce its metadata. Failed and timed-out tasks
    /// both count into `tasks_failed`.
    pub fn finalize(self, granular: bool) -> (RunMetadata, Vec<TaskOutcome>) {
        let tasks_total = self.outcomes.len() as u32;
        let tasks_successful = self
            .outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Succeeded)
            .count() as u32;
        let metadata = RunMetadata {
            run_id: self.run_id,
            tasks_total,
            tasks_successful,
            tasks_failed: tasks_total - tasks_successful,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            granular,
            started_at: self.started_at,
        };
        tracing::info!(
            run_id = metadata.run_id,
            tasks_total = metadata.tasks_total,
            tasks_successful = metadata.tasks_successful,
            tasks_failed = metadata.tasks_failed,
            elapsed_ms = metadata.elapsed_ms,
            "assessment run finished"
        );
        (metadata, self.outcomes)
    }

    /// Metadata for a run that never dispatched (assessment disabled).
    pub fn skipped() -> RunMetadata {
        RunMetadata {
            run_id: Uuid::new_v4().to_string(),
            tasks_total: 0,
            tasks_successful: 0,
            tasks_failed: 0,
            elapsed_ms: 0,
            granular: false,
            started_at: Utc::now(),
        }
    }
}

impl Default for OutcomeTracker {
    fn default() -> Self {
        Self::new()
    }
}
