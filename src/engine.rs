//! Engine facade.
//!
//! Wires the pipeline together: analyze the schema against the extraction
//! result, partition it into tasks, build the shared prompt context, fan
//! the tasks out under bounded concurrency, parse each response, and
//! reassemble the per-leaf entries into one tree with run metadata.
//!
//! Fatal errors (configuration, schema mismatch, empty schema) abort the
//! run before any dispatch. Per-task failures never propagate past the
//! scheduler; they show up as "assessment unavailable" leaves and a
//! non-zero `tasks_failed` count.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::aggregator::{aggregate, AssessmentNode, ThresholdResolver};
use crate::analyzer::analyze;
use crate::config::AssessmentConfig;
use crate::context::{build_context, DocumentInput};
use crate::error::AssessmentError;
use crate::invoker::AssessmentInvoker;
use crate::outcome::{OutcomeTracker, RunMetadata, TaskOutcome, TaskStatus};
use crate::parser::{parse_response, ConfidenceEntry};
use crate::path::LeafPath;
use crate::scheduler::run_tasks;
use crate::tasks::build_tasks;

/// Aggregated assessment plus run-level metadata.
#[derive(Debug)]
pub struct AssessmentOutput {
    pub assessment: AssessmentNode,
    pub metadata: RunMetadata,
    pub outcomes: Vec<TaskOutcome>,
}

/// The granular assessment engine.
pub struct AssessmentEngine {
    config: AssessmentConfig,
    invoker: Arc<dyn AssessmentInvoker>,
}

impl AssessmentEngine {
    pub fn new(config: AssessmentConfig, invoker: Arc<dyn AssessmentInvoker>) -> Self {
        Self { config, invoker }
    }

    pub fn config(&self) -> &AssessmentConfig {
        &self.config
    }

    /// Assess one extraction result against its schema.
    pub async fn assess(
        &self,
        document: &DocumentInput,
        schema: &crate::schema::AttributeSchema,
        extraction: &Value,
    ) -> Result<AssessmentOutput, AssessmentError> {
        if !self.config.enabled {
            tracing::debug!("assessment disabled, skipping");
            return Ok(AssessmentOutput {
                assessment: AssessmentNode::empty(),
                metadata: OutcomeTracker::skipped(),
                outcomes: Vec::new(),
            });
        }

        self.config.validate()?;
        let leaves = analyze(schema, extraction)?;
        let tasks = build_tasks(schema, extraction, &self.config)?;
        tracing::debug!(
            leaves = leaves.len(),
            tasks = tasks.len(),
            max_workers = self.config.max_workers,
            "starting granular assessment"
        );
        let context = Arc::new(build_context(document, schema, &self.config)?);

        let mut tracker = OutcomeTracker::new();
        let runs = run_tasks(tasks, context, self.invoker.clone(), &self.config).await;

        let mut collector: BTreeMap<LeafPath, ConfidenceEntry> = BTreeMap::new();
        for run in runs {
            let mut outcome = run.outcome;
            if outcome.status == TaskStatus::Succeeded {
                match parse_response(&run.task, run.response.as_deref().unwrap_or("")) {
                    Ok(entries) => collector.extend(entries),
                    Err(error) => {
                        tracing::warn!(
                            task_id = run.task.id,
                            kind = run.task.kind.label(),
                            error = %error,
                            "discarding unparsable task response"
                        );
                        outcome.status = TaskStatus::Failed;
                        outcome.error = Some(error.to_string());
                    }
                }
            }
            tracker.record(outcome);
        }

        let resolver = ThresholdResolver::from_config(&self.config);
        let assessment = aggregate(schema, extraction, &collector, &resolver)?;
        let (metadata, outcomes) = tracker.finalize(true);

        Ok(AssessmentOutput {
            assessment,
            metadata,
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::LeafAssessment;
    use crate::invoker::{MockFailure, MockInvoker, TokenUsage};
    use crate::schema::{AttributeNode, AttributeSchema};
    use serde_json::json;

    fn statement_schema() -> AttributeSchema {
        AttributeSchema::new(vec![
            AttributeNode::simple("DocumentDate"),
            AttributeNode::simple("BankName"),
            AttributeNode::group(
                "AccountDetails",
                vec![
                    AttributeNode::simple("AccountNumber"),
                    AttributeNode::simple("AccountHolder"),
                ],
            ),
            AttributeNode::list(
                "Transactions",
                AttributeNode::group(
                    "Transaction",
                    vec![AttributeNode::simple("Date"), AttributeNode::simple("Amount")],
                ),
            ),
        ])
    }

    fn statement_result() -> Value {
        json!({
            "DocumentDate": "2026-03-01",
            "BankName": "First National",
            "AccountDetails": {"AccountNumber": "12345678", "AccountHolder": "J. Doe"},
            "Transactions": [
                {"Date": "2026-02-27", "Amount": "12.50"},
                {"Date": "2026-02-28", "Amount": "-3.10"}
            ]
        })
    }

    fn fast_config() -> AssessmentConfig {
        AssessmentConfig {
            retry_base_delay_ms: 1,
            ..Default::default()
        }
    }

    fn engine_with(invoker: MockInvoker, config: AssessmentConfig) -> AssessmentEngine {
        AssessmentEngine::new(config, Arc::new(invoker))
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    #[tokio::test]
    async fn full_run_assesses_every_leaf() {
        init_tracing();
        let engine = engine_with(
            MockInvoker::with_confidence(0.9).with_reason("supported by the document"),
            fast_config(),
        );
        let output = engine
            .assess(
                &DocumentInput::text_only("statement text"),
                &statement_schema(),
                &statement_result(),
            )
            .await
            .unwrap();

        assert!(output.metadata.granular);
        assert_eq!(output.metadata.tasks_failed, 0);
        assert_eq!(output.metadata.tasks_total, output.metadata.tasks_successful);

        for path in analyze(&statement_schema(), &statement_result()).unwrap() {
            let leaf = output
                .assessment
                .lookup(&path)
                .and_then(AssessmentNode::leaf)
                .unwrap_or_else(|| panic!("no leaf at {path}"));
            let entry = leaf.entry().unwrap_or_else(|| panic!("unavailable at {path}"));
            assert!((entry.confidence - 0.9).abs() < f32::EPSILON);
        }
    }

    #[tokio::test]
    async fn disabled_engine_is_a_no_op() {
        let invoker = Arc::new(MockInvoker::with_confidence(0.9));
        let engine = AssessmentEngine::new(
            AssessmentConfig {
                enabled: false,
                ..Default::default()
            },
            invoker.clone(),
        );
        let output = engine
            .assess(
                &DocumentInput::text_only("statement text"),
                &statement_schema(),
                &statement_result(),
            )
            .await
            .unwrap();

        assert!(output.assessment.is_empty());
        assert!(!output.metadata.granular);
        assert_eq!(output.metadata.tasks_total, 0);
        assert_eq!(invoker.calls(), 0);
    }

    #[tokio::test]
    async fn partial_failure_yields_partial_aggregate() {
        // Fail only the AccountDetails group task; every other leaf must
        // still be scored and counted.
        let engine = engine_with(
            MockInvoker::with_confidence(0.9).failing_when("12345678", MockFailure::Failed),
            fast_config(),
        );
        let output = engine
            .assess(
                &DocumentInput::text_only("statement text"),
                &statement_schema(),
                &statement_result(),
            )
            .await
            .unwrap();

        assert_eq!(output.metadata.tasks_failed, 1);
        assert_eq!(
            output.metadata.tasks_successful,
            output.metadata.tasks_total - 1
        );

        let unavailable = output
            .assessment
            .lookup(&LeafPath::root().child("AccountDetails").child("AccountNumber"))
            .and_then(AssessmentNode::leaf)
            .unwrap();
        assert!(unavailable.is_unavailable());

        let scored = output
            .assessment
            .lookup(&LeafPath::root().child("Transactions").item(0).child("Amount"))
            .and_then(AssessmentNode::leaf)
            .unwrap();
        assert!(scored.entry().is_some());
    }

    #[tokio::test]
    async fn aggregate_is_independent_of_worker_count() {
        let mut outputs = Vec::new();
        for workers in [1usize, 8] {
            let config = AssessmentConfig {
                max_workers: workers,
                simple_batch_size: 1,
                retry_base_delay_ms: 1,
                ..Default::default()
            };
            let engine = engine_with(MockInvoker::with_confidence(0.75), config);
            let output = engine
                .assess(
                    &DocumentInput::text_only("statement text"),
                    &statement_schema(),
                    &statement_result(),
                )
                .await
                .unwrap();
            outputs.push(output.assessment);
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[tokio::test]
    async fn unparsable_response_downgrades_the_task() {
        struct GarbageInvoker;
        #[async_trait::async_trait]
        impl AssessmentInvoker for GarbageInvoker {
            async fn invoke(
                &self,
                _statik: &crate::context::StaticSegment,
                _dynamic: &crate::context::DynamicSegment,
                _kind: &crate::tasks::TaskKind,
            ) -> Result<crate::invoker::InvokeResponse, crate::invoker::InvokeError> {
                Ok(crate::invoker::InvokeResponse {
                    text: "not json at all".to_string(),
                    usage: None,
                })
            }
        }

        let engine = AssessmentEngine::new(fast_config(), Arc::new(GarbageInvoker));
        let output = engine
            .assess(
                &DocumentInput::text_only("statement text"),
                &statement_schema(),
                &statement_result(),
            )
            .await
            .unwrap();

        assert_eq!(output.metadata.tasks_successful, 0);
        assert_eq!(output.metadata.tasks_failed, output.metadata.tasks_total);
        let leaf = output
            .assessment
            .lookup(&LeafPath::root().child("DocumentDate"))
            .and_then(AssessmentNode::leaf)
            .unwrap();
        assert!(leaf.is_unavailable());
    }

    #[tokio::test]
    async fn invalid_config_aborts_before_dispatch() {
        let invoker = Arc::new(MockInvoker::with_confidence(0.9));
        let engine = AssessmentEngine::new(
            AssessmentConfig {
                simple_batch_size: 0,
                ..Default::default()
            },
            invoker.clone(),
        );
        let err = engine
            .assess(
                &DocumentInput::text_only("statement text"),
                &statement_schema(),
                &statement_result(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::InvalidBatchSize { .. }));
        assert_eq!(invoker.calls(), 0);
    }

    #[tokio::test]
    async fn schema_mismatch_aborts_before_dispatch() {
        let invoker = Arc::new(MockInvoker::with_confidence(0.9));
        let engine = AssessmentEngine::new(fast_config(), invoker.clone());
        let err = engine
            .assess(
                &DocumentInput::text_only("statement text"),
                &statement_schema(),
                &json!({"AccountDetails": "not an object"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::SchemaMismatch { .. }));
        assert_eq!(invoker.calls(), 0);
    }

    #[tokio::test]
    async fn usage_flows_into_outcomes() {
        let engine = engine_with(
            MockInvoker::with_confidence(0.9).with_usage(TokenUsage {
                input_tokens: 900,
                output_tokens: 45,
            }),
            fast_config(),
        );
        let output = engine
            .assess(
                &DocumentInput::text_only("statement text"),
                &statement_schema(),
                &statement_result(),
            )
            .await
            .unwrap();
        assert!(output
            .outcomes
            .iter()
            .all(|o| o.usage.map(|u| u.input_tokens) == Some(900)));
    }

    #[tokio::test]
    async fn thresholds_resolved_in_output() {
        let mut config = fast_config();
        config.global_threshold = Some(0.8);
        config
            .per_attribute_thresholds
            .insert("BankName".to_string(), 0.95);
        let engine = engine_with(MockInvoker::with_confidence(0.9), config);
        let output = engine
            .assess(
                &DocumentInput::text_only("statement text"),
                &statement_schema(),
                &statement_result(),
            )
            .await
            .unwrap();

        let bank = output
            .assessment
            .lookup(&LeafPath::root().child("BankName"))
            .and_then(AssessmentNode::leaf)
            .and_then(LeafAssessment::entry)
            .unwrap();
        assert_eq!(bank.confidence_threshold, Some(0.95));
        let date = output
            .assessment
            .lookup(&LeafPath::root().child("DocumentDate"))
            .and_then(AssessmentNode::leaf)
            .and_then(LeafAssessment::entry)
            .unwrap();
        assert_eq!(date.confidence_threshold, Some(0.8));
    }
}
