//! Engine configuration.
//!
//! One config struct drives the whole run: task batching, worker-pool
//! sizing, retry policy, confidence thresholds, and the prompt template the
//! context builder splits into its static and dynamic segments.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::{CACHE_POINT, DEFAULT_PROMPT_TEMPLATE};
use crate::error::AssessmentError;

/// Configuration for one assessment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    /// When false, the engine returns an empty aggregate without invoking
    /// the inference service.
    pub enabled: bool,
    /// Root-level simple attributes per SimpleBatch task.
    pub simple_batch_size: usize,
    /// Consecutive list items per ListItems task.
    pub list_batch_size: usize,
    /// Maximum concurrently in-flight inference calls.
    pub max_workers: usize,
    /// Retries after a throttled invocation (initial attempt not counted).
    pub max_retries: u32,
    /// Base delay for exponential backoff between throttle retries.
    pub retry_base_delay_ms: u64,
    /// Document-level confidence threshold applied to every leaf that has
    /// no per-attribute override.
    pub global_threshold: Option<f32>,
    /// Per-attribute thresholds keyed by rendered leaf path. Exact paths
    /// (`Transactions[3].Amount`) take precedence over index-free attribute
    /// paths (`Transactions[].Amount`).
    pub per_attribute_thresholds: HashMap<String, f32>,
    /// Overall run deadline. Once elapsed, in-flight tasks finish but no
    /// new tasks are dispatched.
    pub deadline: Option<Duration>,
    /// Prompt template containing exactly one cache-point marker separating
    /// the reusable document context from the per-task portion.
    pub prompt_template: String,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            simple_batch_size: 5,
            list_batch_size: 1,
            max_workers: 4,
            max_retries: 3,
            retry_base_delay_ms: 500,
            global_threshold: None,
            per_attribute_thresholds: HashMap::new(),
            deadline: None,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

impl AssessmentConfig {
    /// Validate the configuration before any task runs.
    pub fn validate(&self) -> Result<(), AssessmentError> {
        if self.simple_batch_size == 0 {
            return Err(AssessmentError::InvalidBatchSize {
                field: "simple_batch_size",
                value: self.simple_batch_size,
            });
        }
        if self.list_batch_size == 0 {
            return Err(AssessmentError::InvalidBatchSize {
                field: "list_batch_size",
                value: self.list_batch_size,
            });
        }
        if self.max_workers == 0 {
            return Err(AssessmentError::Config(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if let Some(threshold) = self.global_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(AssessmentError::Config(format!(
                    "global_threshold {threshold} is outside [0, 1]"
                )));
            }
        }
        for (path, threshold) in &self.per_attribute_thresholds {
            if !(0.0..=1.0).contains(threshold) {
                return Err(AssessmentError::Config(format!(
                    "threshold {threshold} for {path} is outside [0, 1]"
                )));
            }
        }
        let markers = self.prompt_template.matches(CACHE_POINT).count();
        if markers != 1 {
            return Err(AssessmentError::Config(format!(
                "prompt template must contain exactly one {CACHE_POINT} marker, found {markers}"
            )));
        }
        Ok(())
    }
}
