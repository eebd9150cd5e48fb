//! Bounded-concurrency task execution.
//!
//! Dispatches assessment tasks to the invoker under a semaphore capped at
//! `max_workers`. Tasks are mutually independent, so completion order is
//! arbitrary and a single failure never aborts the run: throttled calls
//! retry with exponential backoff, timeouts mark the task timed out, and
//! every other invocation error fails just that task. Once the run
//! deadline elapses, in-flight tasks finish but queued tasks are failed
//! without being dispatched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::AssessmentConfig;
use crate::context::PromptContext;
use crate::invoker::{AssessmentInvoker, InvokeError};
use crate::outcome::{TaskOutcome, TaskStatus};
use crate::tasks::AssessmentTask;

/// One task paired with its outcome and, on success, the raw response.
#[derive(Debug)]
pub struct TaskRun {
    pub task: AssessmentTask,
    pub outcome: TaskOutcome,
    pub response: Option<String>,
}

/// Run all tasks under the bounded worker pool. Always returns one
/// `TaskRun` per input task, in completion order.
pub async fn run_tasks(
    tasks: Vec<AssessmentTask>,
    context: Arc<PromptContext>,
    invoker: Arc<dyn AssessmentInvoker>,
    config: &AssessmentConfig,
) -> Vec<TaskRun> {
    let semaphore = Arc::new(Semaphore::new(config.max_workers));
    let deadline = config.deadline.map(|d| Instant::now() + d);
    let max_retries = config.max_retries;
    let base_delay = Duration::from_millis(config.retry_base_delay_ms);

    let mut join_set = JoinSet::new();
    let total = tasks.len();
    for task in tasks {
        let semaphore = semaphore.clone();
        let context = context.clone();
        let invoker = invoker.clone();
        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return deadline_failed(task, "worker pool closed before dispatch");
                }
            };
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(task_id = task.id, "run deadline elapsed before dispatch");
                return deadline_failed(task, "run deadline elapsed before dispatch");
            }
            run_one(task, &context, invoker.as_ref(), max_retries, base_delay).await
        });
    }

    let mut runs = Vec::with_capacity(total);
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(run) => runs.push(run),
            Err(error) => tracing::error!(error = %error, "assessment worker panicked"),
        }
    }
    runs
}

/// Execute one task: invoke, retrying throttles with backoff.
async fn run_one(
    task: AssessmentTask,
    context: &PromptContext,
    invoker: &dyn AssessmentInvoker,
    max_retries: u32,
    base_delay: Duration,
) -> TaskRun {
    let start = Instant::now();
    let dynamic = context.dynamic_segment(&task);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match invoker
            .invoke(context.static_segment(), &dynamic, &task.kind)
            .await
        {
            Ok(response) => {
                tracing::debug!(
                    task_id = task.id,
                    kind = task.kind.label(),
                    attempts,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "task succeeded"
                );
                let outcome = TaskOutcome {
                    task_id: task.id.clone(),
                    kind: task.kind.label(),
                    status: TaskStatus::Succeeded,
                    error: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    attempts,
                    usage: response.usage,
                };
                return TaskRun {
                    task,
                    outcome,
                    response: Some(response.text),
                };
            }
            Err(InvokeError::Throttled(message)) if attempts <= max_retries => {
                let delay = backoff_delay(base_delay, attempts);
                tracing::debug!(
                    task_id = task.id,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    message,
                    "throttled, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                let status = match &error {
                    InvokeError::Timeout(_) => TaskStatus::TimedOut,
                    _ => TaskStatus::Failed,
                };
                tracing::warn!(
                    task_id = task.id,
                    kind = task.kind.label(),
                    attempts,
                    error = %error,
                    "task did not complete"
                );
                let outcome = TaskOutcome {
                    task_id: task.id.clone(),
                    kind: task.kind.label(),
                    status,
                    error: Some(error.to_string()),
                    duration_ms: start.elapsed().as_millis() as u64,
                    attempts,
                    usage: None,
                };
                return TaskRun {
                    task,
                    outcome,
                    response: None,
                };
            }
        }
    }
}

fn deadline_failed(task: AssessmentTask, message: &str) -> TaskRun {
    let outcome = TaskOutcome {
        task_id: task.id.clone(),
        kind: task.kind.label(),
        status: TaskStatus::Failed,
        error: Some(message.to_string()),
        duration_ms: 0,
        attempts: 0,
        usage: None,
    };
    TaskRun {
        task,
        outcome,
        response: None,
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1)` plus up to half
/// a base interval of random spread.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponential = base.saturating_mul(1u32 << (attempt - 1).min(16));
    let jitter_ms = {
        let mut rng = rand::thread_rng();
        rng.gen_range(0..=base.as_millis().max(2) as u64 / 2)
    };
    exponential + Duration::from_millis(jitter_ms)
}
