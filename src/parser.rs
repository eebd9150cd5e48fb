//! Response parsing and normalization.
//!
//! Validates one task's raw response against the task's sub-schema,
//! producing one confidence entry per covered leaf path. Spatial fields
//! arrive as `bbox = [x1, y1, x2, y2]` on a 0-1000 normalized scale with a
//! 1-based page number and are converted to fractional
//! `{top, left, width, height}` coordinates. Degenerate boxes are dropped
//! with a warning rather than failing the task; a missing bbox simply
//! leaves the geometry list empty.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::path::LeafPath;
use crate::schema::AttributeNode;
use crate::tasks::{AssessmentTask, TaskKind};

/// Coordinate scale used by the inference service for bounding boxes.
const BBOX_SCALE: f32 = 1000.0;

/// Per-task parse failures. The task is marked failed and its leaves read
/// "assessment unavailable" in the aggregate; the run continues.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("response shape does not match task at {path}: {detail}")]
    ShapeMismatch { path: String, detail: String },

    #[error("confidence {value} at {path} is outside [0, 1]")]
    ConfidenceOutOfRange { path: String, value: f64 },
}

/// Normalized page-fractional bounding box. All fields are in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: f32,
    pub left: f32,
    pub width: f32,
    pub height: f32,
}

/// One piece of spatial evidence for a leaf, derived from exactly one
/// bounding box reported by the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub bounding_box: BoundingBox,
    /// 1-based page number.
    pub page: u32,
}

/// Confidence assessment for one leaf attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceEntry {
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_reason: Option<String>,
    /// Resolved at aggregation time from the threshold configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub geometry: Vec<Geometry>,
}

/// Parse and validate one task's raw response.
pub fn parse_response(
    task: &AssessmentTask,
    raw: &str,
) -> Result<BTreeMap<LeafPath, ConfidenceEntry>, ParseError> {
    let body: Value = serde_json::from_str(extract_json(raw))
        .map_err(|error| ParseError::Malformed(error.to_string()))?;

    let mut entries = BTreeMap::new();
    match &task.kind {
        TaskKind::SimpleBatch => {
            let object = body.as_object().ok_or_else(|| shape_error(
                &LeafPath::root(),
                "response is not an object",
            ))?;
            for node in &task.attributes {
                collect_node(node, object.get(node.name()), &LeafPath::root(), &mut entries)?;
            }
        }
        TaskKind::Group { path } => {
            let object = body
                .as_object()
                .ok_or_else(|| shape_error(path, "group response is not an object"))?;
            for node in &task.attributes {
                collect_node(node, object.get(node.name()), path, &mut entries)?;
            }
        }
        TaskKind::ListItems { path, start, end } => {
            let items = body
                .as_array()
                .ok_or_else(|| shape_error(path, "list response is not an array"))?;
            if items.len() != end - start {
                return Err(ParseError::ShapeMismatch {
                    path: path.to_string(),
                    detail: format!(
                        "expected {} assessed items, got {}",
                        end - start,
                        items.len()
                    ),
                });
            }
            let template = task.attributes.first().ok_or_else(|| {
                shape_error(path, "list task carries no item template")
            })?;
            for (offset, element) in items.iter().enumerate() {
                collect_element(template, element, &path.item(start + offset), &mut entries)?;
            }
        }
    }

    // Every covered leaf must be present; anything beyond the covered set
    // is dropped so a chatty response cannot leak into other tasks' leaves.
    let covered: BTreeSet<&LeafPath> = task.leaf_paths.iter().collect();
    for path in &task.leaf_paths {
        if !entries.contains_key(path) {
            return Err(ParseError::ShapeMismatch {
                path: path.to_string(),
                detail: "missing from response".to_string(),
            });
        }
    }
    let extra: Vec<LeafPath> = entries
        .keys()
        .filter(|path| !covered.contains(path))
        .cloned()
        .collect();
    for path in extra {
        tracing::warn!(task_id = task.id, path = %path, "dropping uncovered entry from response");
        entries.remove(&path);
    }

    Ok(entries)
}

fn shape_error(path: &LeafPath, detail: &str) -> ParseError {
    ParseError::ShapeMismatch {
        path: path.to_string(),
        detail: detail.to_string(),
    }
}

/// Collect entries for one schema node. An absent or null value is not an
/// error here: the attribute may have been pruned from the extraction, so
/// the covered-leaf check at the end of `parse_response` decides whether
/// anything is actually missing.
fn collect_node(
    node: &AttributeNode,
    value: Option<&Value>,
    prefix: &LeafPath,
    entries: &mut BTreeMap<LeafPath, ConfidenceEntry>,
) -> Result<(), ParseError> {
    let path = prefix.child(node.name());
    let Some(value) = value else {
        return Ok(());
    };
    match node {
        AttributeNode::Simple { .. } => {
            let entry = parse_entry(&path, value)?;
            entries.insert(path, entry);
        }
        AttributeNode::Group { attributes, .. } => {
            if value.is_null() {
                return Ok(());
            }
            let object = value
                .as_object()
                .ok_or_else(|| shape_error(&path, "group entry is not an object"))?;
            for child in attributes {
                collect_node(child, object.get(child.name()), &path, entries)?;
            }
        }
        AttributeNode::List { item, .. } => {
            if value.is_null() {
                return Ok(());
            }
            let items = value
                .as_array()
                .ok_or_else(|| shape_error(&path, "list entry is not an array"))?;
            for (index, element) in items.iter().enumerate() {
                collect_element(item, element, &path.item(index), entries)?;
            }
        }
    }
    Ok(())
}

fn collect_element(
    template: &AttributeNode,
    element: &Value,
    item_path: &LeafPath,
    entries: &mut BTreeMap<LeafPath, ConfidenceEntry>,
) -> Result<(), ParseError> {
    match template {
        AttributeNode::Simple { .. } => {
            let entry = parse_entry(item_path, element)?;
            entries.insert(item_path.clone(), entry);
        }
        AttributeNode::Group { attributes, .. } => {
            if element.is_null() {
                return Ok(());
            }
            let object = element
                .as_object()
                .ok_or_else(|| shape_error(item_path, "item entry is not an object"))?;
            for child in attributes {
                collect_node(child, object.get(child.name()), item_path, entries)?;
            }
        }
        AttributeNode::List { item, .. } => {
            if element.is_null() {
                return Ok(());
            }
            let items = element
                .as_array()
                .ok_or_else(|| shape_error(item_path, "nested list entry is not an array"))?;
            for (index, nested) in items.iter().enumerate() {
                collect_element(item, nested, &item_path.item(index), entries)?;
            }
        }
    }
    Ok(())
}

/// Parse one leaf-level assessment object.
fn parse_entry(path: &LeafPath, value: &Value) -> Result<ConfidenceEntry, ParseError> {
    let object = value
        .as_object()
        .ok_or_else(|| shape_error(path, "leaf assessment is not an object"))?;

    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| shape_error(path, "missing numeric confidence"))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ParseError::ConfidenceOutOfRange {
            path: path.to_string(),
            value: confidence,
        });
    }

    let confidence_reason = object
        .get("confidence_reason")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ConfidenceEntry {
        confidence: confidence as f32,
        confidence_reason,
        confidence_threshold: None,
        geometry: parse_geometry(path, object),
    })
}

/// Convert the reported bbox/page pair into normalized geometry.
///
/// `bbox = [x1, y1, x2, y2]` on a 0-1000 scale becomes
/// `top = y1/1000, left = x1/1000, width = (x2-x1)/1000,
/// height = (y2-y1)/1000`. Degenerate or incomplete boxes are flagged and
/// dropped without failing the entry.
fn parse_geometry(path: &LeafPath, object: &serde_json::Map<String, Value>) -> Vec<Geometry> {
    let Some(bbox_value) = object.get("bbox") else {
        return Vec::new();
    };
    let coords: Option<Vec<f64>> = bbox_value
        .as_array()
        .filter(|coords| coords.len() == 4)
        .map(|coords| coords.iter().filter_map(Value::as_f64).collect())
        .filter(|coords: &Vec<f64>| coords.len() == 4);
    let Some(coords) = coords else {
        tracing::warn!(path = %path, "bbox is not a 4-number array, dropping geometry");
        return Vec::new();
    };
    let Some(page) = object.get("page").and_then(Value::as_u64) else {
        tracing::warn!(path = %path, "bbox without a page number, dropping geometry");
        return Vec::new();
    };
    if page < 1 {
        tracing::warn!(path = %path, page, "page numbers are 1-based, dropping geometry");
        return Vec::new();
    }
    let (x1, y1, x2, y2) = (coords[0], coords[1], coords[2], coords[3]);
    if x2 <= x1 || y2 <= y1 {
        tracing::warn!(path = %path, ?coords, "degenerate bounding box, dropping geometry");
        return Vec::new();
    }

    vec![Geometry {
        bounding_box: BoundingBox {
            top: y1 as f32 / BBOX_SCALE,
            left: x1 as f32 / BBOX_SCALE,
            width: (x2 - x1) as f32 / BBOX_SCALE,
            height: (y2 - y1) as f32 / BBOX_SCALE,
        },
        page: page as u32,
    }]
}

/// Pull the JSON body out of a response that may wrap it in a code fence.
fn extract_json(response: &str) -> &str {
    if let Some(start) = response.find("```json") {
        let content_start = start + "```json".len();
        if let Some(end) = response[content_start..].find("```") {
            return response[content_start..content_start + end].trim();
        }
    }
    response.trim()
}
