//! Task construction.
//!
//! Partitions the assessable leaves of one extraction result into
//! assessment tasks. The partition is strict: every leaf is covered by
//! exactly one task, so results can be merged without coordination and the
//! aggregate is independent of completion order.
//!
//! Three task kinds:
//! - SimpleBatch: root-level simple attributes, chunked by
//!   `simple_batch_size` in declaration order.
//! - Group: one task per group reachable without passing through a list or
//!   another group, covering its entire subtree. One inference call sees
//!   the whole group together.
//! - ListItems: per-item expansion of each root-reachable list, chunked by
//!   `list_batch_size` consecutive items. Everything under one item,
//!   nested groups and deeper lists included, stays in that item's task.

use serde_json::Value;
use uuid::Uuid;

use crate::analyzer::{collect_list_element, collect_node};
use crate::config::AssessmentConfig;
use crate::error::AssessmentError;
use crate::path::LeafPath;
use crate::schema::{AttributeNode, AttributeSchema};

/// What one task assesses.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// A batch of root-level simple attributes.
    SimpleBatch,
    /// One group subtree, identified by its path.
    Group { path: LeafPath },
    /// A run of consecutive items `[start, end)` of the list at `path`.
    ListItems { path: LeafPath, start: usize, end: usize },
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SimpleBatch => "simple_batch",
            Self::Group { .. } => "group",
            Self::ListItems { .. } => "list_items",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SimpleBatch => write!(f, "simple_batch"),
            Self::Group { path } => write!(f, "group({path})"),
            Self::ListItems { path, start, end } => {
                write!(f, "list_items({path}[{start}..{end}])")
            }
        }
    }
}

/// One unit of assessment work.
#[derive(Debug, Clone)]
pub struct AssessmentTask {
    pub id: String,
    pub kind: TaskKind,
    /// Leaf paths this task covers. Disjoint from every other task.
    pub leaf_paths: Vec<LeafPath>,
    /// Sub-schema the response is validated against: the batch's simple
    /// nodes, a group's children, or a list's item template.
    pub attributes: Vec<AttributeNode>,
    /// Extraction slice echoed to the inference service, shaped the way
    /// the response must be shaped.
    pub values: Value,
}

pub fn new_task_id() -> String {
    Uuid::new_v4().to_string()
}

/// Build the task partition for one schema/result pair.
pub fn build_tasks(
    schema: &AttributeSchema,
    extraction: &Value,
    config: &AssessmentConfig,
) -> Result<Vec<AssessmentTask>, AssessmentError> {
    if config.simple_batch_size == 0 {
        return Err(AssessmentError::InvalidBatchSize {
            field: "simple_batch_size",
            value: config.simple_batch_size,
        });
    }
    if config.list_batch_size == 0 {
        return Err(AssessmentError::InvalidBatchSize {
            field: "list_batch_size",
            value: config.list_batch_size,
        });
    }
    let root = extraction
        .as_object()
        .ok_or_else(|| AssessmentError::SchemaMismatch {
            path: "$".to_string(),
            detail: "extraction root is not an object".to_string(),
        })?;

    let mut simple_pool: Vec<(AttributeNode, Value)> = Vec::new();
    let mut container_tasks: Vec<AssessmentTask> = Vec::new();

    for node in &schema.attributes {
        let Some(value) = root.get(node.name()) else {
            continue;
        };
        match node {
            AttributeNode::Simple { name, .. } => {
                if value.is_object() || value.is_array() {
                    return Err(AssessmentError::SchemaMismatch {
                        path: name.clone(),
                        detail: "expected a scalar for a simple attribute".to_string(),
                    });
                }
                simple_pool.push((node.clone(), value.clone()));
            }
            AttributeNode::Group { name, attributes, .. } => {
                if value.is_null() {
                    continue;
                }
                let path = LeafPath::root().child(name);
                let mut leaf_paths = Vec::new();
                collect_node(node, Some(value), &LeafPath::root(), &mut leaf_paths)?;
                if leaf_paths.is_empty() {
                    continue;
                }
                container_tasks.push(AssessmentTask {
                    id: new_task_id(),
                    kind: TaskKind::Group { path },
                    leaf_paths,
                    attributes: attributes.clone(),
                    values: value.clone(),
                });
            }
            AttributeNode::List { name, item, .. } => {
                if value.is_null() {
                    continue;
                }
                let path = LeafPath::root().child(name);
                let items = value
                    .as_array()
                    .ok_or_else(|| AssessmentError::SchemaMismatch {
                        path: path.to_string(),
                        detail: "list value is not an array".to_string(),
                    })?;
                for (chunk_index, chunk) in items.chunks(config.list_batch_size).enumerate() {
                    let start = chunk_index * config.list_batch_size;
                    let end = start + chunk.len();
                    let mut leaf_paths = Vec::new();
                    for (offset, element) in chunk.iter().enumerate() {
                        collect_list_element(
                            item,
                            element,
                            &path.item(start + offset),
                            &mut leaf_paths,
                        )?;
                    }
                    if leaf_paths.is_empty() {
                        continue;
                    }
                    container_tasks.push(AssessmentTask {
                        id: new_task_id(),
                        kind: TaskKind::ListItems {
                            path: path.clone(),
                            start,
                            end,
                        },
                        leaf_paths,
                        attributes: vec![(**item).clone()],
                        values: Value::Array(chunk.to_vec()),
                    });
                }
            }
        }
    }

    let mut tasks = Vec::new();
    for batch in simple_pool.chunks(config.simple_batch_size) {
        let leaf_paths: Vec<LeafPath> = batch
            .iter()
            .map(|(node, _)| LeafPath::root().child(node.name()))
            .collect();
        let values = Value::Object(
            batch
                .iter()
                .map(|(node, value)| (node.name().to_string(), value.clone()))
                .collect(),
        );
        tasks.push(AssessmentTask {
            id: new_task_id(),
            kind: TaskKind::SimpleBatch,
            leaf_paths,
            attributes: batch.iter().map(|(node, _)| node.clone()).collect(),
            values,
        });
    }
    tasks.extend(container_tasks);

    if tasks.is_empty() {
        return Err(AssessmentError::EmptySchema);
    }

    tracing::debug!(
        tasks = tasks.len(),
        leaves = tasks.iter().map(|t| t.leaf_paths.len()).sum::<usize>(),
        "built assessment task partition"
    );
    Ok(tasks)
}
