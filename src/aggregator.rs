//! Result aggregation.
//!
//! Merges per-task confidence entries, keyed by leaf path, back into one
//! tree mirroring the extraction result. The task partition guarantees
//! each leaf is written exactly once, so merging is a plain map fill
//! followed by a recursive rebuild; completion order cannot change the
//! outcome. Leaves whose owning task did not succeed carry an explicit
//! "assessment unavailable" marker so consumers can tell "evaluated, low
//! confidence" from "not evaluated".

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;

use crate::config::AssessmentConfig;
use crate::error::AssessmentError;
use crate::parser::ConfidenceEntry;
use crate::path::LeafPath;
use crate::schema::{AttributeNode, AttributeSchema};

/// Marker distinguishing an unevaluated leaf from a low-confidence one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnavailableMarker {
    pub assessment_unavailable: bool,
}

/// Assessment of one simple leaf.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LeafAssessment {
    Scored(ConfidenceEntry),
    Unavailable(UnavailableMarker),
}

impl LeafAssessment {
    pub fn unavailable() -> Self {
        Self::Unavailable(UnavailableMarker {
            assessment_unavailable: true,
        })
    }

    pub fn entry(&self) -> Option<&ConfidenceEntry> {
        match self {
            Self::Scored(entry) => Some(entry),
            Self::Unavailable(_) => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// The aggregated assessment tree, isomorphic to the extraction result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AssessmentNode {
    Leaf(LeafAssessment),
    Group(BTreeMap<String, AssessmentNode>),
    Items(Vec<AssessmentNode>),
}

impl AssessmentNode {
    /// Empty aggregate, used by the disabled fast path.
    pub fn empty() -> Self {
        Self::Group(BTreeMap::new())
    }

    pub fn child(&self, name: &str) -> Option<&AssessmentNode> {
        match self {
            Self::Group(members) => members.get(name),
            _ => None,
        }
    }

    pub fn item(&self, index: usize) -> Option<&AssessmentNode> {
        match self {
            Self::Items(items) => items.get(index),
            _ => None,
        }
    }

    pub fn leaf(&self) -> Option<&LeafAssessment> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Navigate to the node at `path`.
    pub fn lookup(&self, path: &LeafPath) -> Option<&AssessmentNode> {
        let mut node = self;
        for step in path.steps() {
            node = match step {
                crate::path::PathStep::Key(key) => node.child(key)?,
                crate::path::PathStep::Index(index) => node.item(*index)?,
            };
        }
        Some(node)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Group(members) => members.is_empty(),
            Self::Items(items) => items.is_empty(),
            Self::Leaf(_) => false,
        }
    }
}

/// Resolves the confidence threshold for one leaf. Per-attribute entries
/// override the document-level global; an exact rendered path overrides
/// the index-free attribute path.
pub struct ThresholdResolver<'a> {
    global: Option<f32>,
    per_attribute: &'a HashMap<String, f32>,
}

impl<'a> ThresholdResolver<'a> {
    pub fn from_config(config: &'a AssessmentConfig) -> Self {
        Self {
            global: config.global_threshold,
            per_attribute: &config.per_attribute_thresholds,
        }
    }

    pub fn resolve(&self, path: &LeafPath) -> Option<f32> {
        self.per_attribute
            .get(&path.to_string())
            .or_else(|| self.per_attribute.get(&path.attribute_path()))
            .copied()
            .or(self.global)
    }
}

/// Rebuild the extraction-shaped tree from the merged entry collector.
pub fn aggregate(
    schema: &AttributeSchema,
    extraction: &Value,
    entries: &BTreeMap<LeafPath, ConfidenceEntry>,
    thresholds: &ThresholdResolver<'_>,
) -> Result<AssessmentNode, AssessmentError> {
    let root = extraction
        .as_object()
        .ok_or_else(|| AssessmentError::SchemaMismatch {
            path: "$".to_string(),
            detail: "extraction root is not an object".to_string(),
        })?;

    let mut members = BTreeMap::new();
    for node in &schema.attributes {
        if let Some(built) = build_node(
            node,
            root.get(node.name()),
            &LeafPath::root(),
            entries,
            thresholds,
        )? {
            members.insert(node.name().to_string(), built);
        }
    }
    Ok(AssessmentNode::Group(members))
}

fn build_node(
    node: &AttributeNode,
    value: Option<&Value>,
    prefix: &LeafPath,
    entries: &BTreeMap<LeafPath, ConfidenceEntry>,
    thresholds: &ThresholdResolver<'_>,
) -> Result<Option<AssessmentNode>, AssessmentError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match node {
        AttributeNode::Simple { name, .. } => {
            let path = prefix.child(name);
            Ok(Some(AssessmentNode::Leaf(leaf_for(&path, entries, thresholds))))
        }
        AttributeNode::Group { name, attributes, .. } => {
            if value.is_null() {
                return Ok(None);
            }
            let path = prefix.child(name);
            let object = value
                .as_object()
                .ok_or_else(|| AssessmentError::SchemaMismatch {
                    path: path.to_string(),
                    detail: "group value is not an object".to_string(),
                })?;
            let mut members = BTreeMap::new();
            for child in attributes {
                if let Some(built) =
                    build_node(child, object.get(child.name()), &path, entries, thresholds)?
                {
                    members.insert(child.name().to_string(), built);
                }
            }
            Ok(Some(AssessmentNode::Group(members)))
        }
        AttributeNode::List { name, item, .. } => {
            if value.is_null() {
                return Ok(None);
            }
            let path = prefix.child(name);
            let items = value
                .as_array()
                .ok_or_else(|| AssessmentError::SchemaMismatch {
                    path: path.to_string(),
                    detail: "list value is not an array".to_string(),
                })?;
            let mut built_items = Vec::with_capacity(items.len());
            for (index, element) in items.iter().enumerate() {
                built_items.push(build_element(
                    item,
                    element,
                    &path.item(index),
                    entries,
                    thresholds,
                )?);
            }
            Ok(Some(AssessmentNode::Items(built_items)))
        }
    }
}

fn build_element(
    template: &AttributeNode,
    element: &Value,
    item_path: &LeafPath,
    entries: &BTreeMap<LeafPath, ConfidenceEntry>,
    thresholds: &ThresholdResolver<'_>,
) -> Result<AssessmentNode, AssessmentError> {
    match template {
        AttributeNode::Simple { .. } => Ok(AssessmentNode::Leaf(leaf_for(
            item_path, entries, thresholds,
        ))),
        AttributeNode::Group { attributes, .. } => {
            let mut members = BTreeMap::new();
            if let Some(object) = element.as_object() {
                for child in attributes {
                    if let Some(built) = build_node(
                        child,
                        object.get(child.name()),
                        item_path,
                        entries,
                        thresholds,
                    )? {
                        members.insert(child.name().to_string(), built);
                    }
                }
            }
            Ok(AssessmentNode::Group(members))
        }
        AttributeNode::List { item, .. } => {
            let mut built_items = Vec::new();
            if let Some(items) = element.as_array() {
                for (index, nested) in items.iter().enumerate() {
                    built_items.push(build_element(
                        item,
                        nested,
                        &item_path.item(index),
                        entries,
                        thresholds,
                    )?);
                }
            }
            Ok(AssessmentNode::Items(built_items))
        }
    }
}

fn leaf_for(
    path: &LeafPath,
    entries: &BTreeMap<LeafPath, ConfidenceEntry>,
    thresholds: &ThresholdResolver<'_>,
) -> LeafAssessment {
    match entries.get(path) {
        Some(entry) => {
            let mut resolved = entry.clone();
            resolved.confidence_threshold = thresholds.resolve(path);
            LeafAssessment::Scored(resolved)
        }
        None => LeafAssessment::unavailable(),
    }
}
