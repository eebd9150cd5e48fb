//! Inference-service collaborator interface.
//!
//! The engine never talks to an inference backend directly; it hands the
//! scheduler an `AssessmentInvoker`. The production client (prompt wiring,
//! wire protocol, authentication) lives outside this crate. `MockInvoker`
//! ships here so tests and downstream consumers can exercise the engine
//! without a backend.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::context::{DynamicSegment, StaticSegment};
use crate::tasks::TaskKind;

/// Per-call token counts reported by the inference backend, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One raw inference response.
#[derive(Debug, Clone)]
pub struct InvokeResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Failures raised by an invoker. Throttling is retryable; a timeout marks
/// the task timed out without retry; anything else fails the task.
#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("inference service throttled the request: {0}")]
    Throttled(String),

    #[error("inference call timed out after {0:?}")]
    Timeout(Duration),

    #[error("inference call failed: {0}")]
    Failed(String),
}

/// Executes one assessment request against the inference service.
#[async_trait]
pub trait AssessmentInvoker: Send + Sync {
    async fn invoke(
        &self,
        statik: &StaticSegment,
        dynamic: &DynamicSegment,
        kind: &TaskKind,
    ) -> Result<InvokeResponse, InvokeError>;
}

/// Failure kind injected by `MockInvoker::failing_when`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Throttled,
    Timeout,
    Failed,
}

/// Mock invoker returning schema-shaped assessments.
///
/// Echoes the task's value slice with every leaf replaced by a confidence
/// entry, so responses always match what the parser expects for the task.
pub struct MockInvoker {
    confidence: f32,
    reason: Option<String>,
    bbox: Option<([f64; 4], u32)>,
    usage: Option<TokenUsage>,
    fail_matching: Option<(String, MockFailure)>,
    throttle_remaining: AtomicU32,
    calls: AtomicUsize,
}

impl MockInvoker {
    pub fn with_confidence(confidence: f32) -> Self {
        Self {
            confidence,
            reason: None,
            bbox: None,
            usage: None,
            fail_matching: None,
            throttle_remaining: AtomicU32::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_bbox(mut self, bbox: [f64; 4], page: u32) -> Self {
        self.bbox = Some((bbox, page));
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Fail any call whose value slice serialization contains `needle`.
    pub fn failing_when(mut self, needle: &str, failure: MockFailure) -> Self {
        self.fail_matching = Some((needle.to_string(), failure));
        self
    }

    /// Throttle the first `count` calls, then succeed.
    pub fn throttling_first(self, count: u32) -> Self {
        self.throttle_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Total number of invocations observed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn entry(&self) -> Value {
        let mut object = Map::new();
        object.insert("confidence".to_string(), json!(self.confidence as f64));
        if let Some(reason) = &self.reason {
            object.insert("confidence_reason".to_string(), json!(reason));
        }
        if let Some((bbox, page)) = &self.bbox {
            object.insert("bbox".to_string(), json!(bbox));
            object.insert("page".to_string(), json!(page));
        }
        Value::Object(object)
    }

    fn assess_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(object) => Value::Object(
                object
                    .iter()
                    .map(|(key, nested)| (key.clone(), self.assess_value(nested)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.assess_value(item)).collect())
            }
            _ => self.entry(),
        }
    }
}

#[async_trait]
impl AssessmentInvoker for MockInvoker {
    async fn invoke(
        &self,
        _statik: &StaticSegment,
        dynamic: &DynamicSegment,
        _kind: &TaskKind,
    ) -> Result<InvokeResponse, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self
            .throttle_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(InvokeError::Throttled("mock throttle".to_string()));
        }

        if let Some((needle, failure)) = &self.fail_matching {
            if dynamic.values.to_string().contains(needle.as_str()) {
                return match failure {
                    MockFailure::Throttled => {
                        Err(InvokeError::Throttled("mock throttle".to_string()))
                    }
                    MockFailure::Timeout => Err(InvokeError::Timeout(Duration::from_secs(30))),
                    MockFailure::Failed => Err(InvokeError::Failed("mock failure".to_string())),
                };
            }
        }

        let body = self.assess_value(&dynamic.values);
        Ok(InvokeResponse {
            text: body.to_string(),
            usage: self.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssessmentConfig;
    use crate::context::{build_context, DocumentInput};
    use crate::schema::{AttributeNode, AttributeSchema};
    use crate::tasks::build_tasks;
    use serde_json::json;

    fn segments() -> (StaticSegment, DynamicSegment) {
        let schema = AttributeSchema::new(vec![
            AttributeNode::simple("Total"),
            AttributeNode::simple("Currency"),
        ]);
        let config = AssessmentConfig::default();
        let context = build_context(&DocumentInput::text_only("doc"), &schema, &config).unwrap();
        let tasks = build_tasks(
            &schema,
            &json!({"Total": "10.00", "Currency": "EUR"}),
            &config,
        )
        .unwrap();
        let dynamic = context.dynamic_segment(&tasks[0]);
        (context.static_segment().clone(), dynamic)
    }

    #[tokio::test]
    async fn mock_echoes_value_shape() {
        let (statik, dynamic) = segments();
        let invoker = MockInvoker::with_confidence(0.9).with_reason("matches the document");
        let response = invoker
            .invoke(&statik, &dynamic, &TaskKind::SimpleBatch)
            .await
            .unwrap();

        let body: Value = serde_json::from_str(&response.text).unwrap();
        assert_eq!(body["Total"]["confidence"], json!(0.9));
        assert_eq!(body["Currency"]["confidence_reason"], json!("matches the document"));
        assert_eq!(invoker.calls(), 1);
    }

    #[tokio::test]
    async fn mock_throttles_then_succeeds() {
        let (statik, dynamic) = segments();
        let invoker = MockInvoker::with_confidence(0.5).throttling_first(2);

        for _ in 0..2 {
            let err = invoker
                .invoke(&statik, &dynamic, &TaskKind::SimpleBatch)
                .await
                .unwrap_err();
            assert!(matches!(err, InvokeError::Throttled(_)));
        }
        assert!(invoker
            .invoke(&statik, &dynamic, &TaskKind::SimpleBatch)
            .await
            .is_ok());
        assert_eq!(invoker.calls(), 3);
    }

    #[tokio::test]
    async fn mock_fails_matching_slices() {
        let (statik, dynamic) = segments();
        let invoker =
            MockInvoker::with_confidence(0.5).failing_when("EUR", MockFailure::Failed);
        let err = invoker
            .invoke(&statik, &dynamic, &TaskKind::SimpleBatch)
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Failed(_)));
    }

    #[tokio::test]
    async fn mock_reports_usage() {
        let (statik, dynamic) = segments();
        let invoker = MockInvoker::with_confidence(0.5).with_usage(TokenUsage {
            input_tokens: 1200,
            output_tokens: 80,
        });
        let response = invoker
            .invoke(&statik, &dynamic, &TaskKind::SimpleBatch)
            .await
            .unwrap();
        assert_eq!(response.usage.unwrap().input_tokens, 1200);
    }
}
