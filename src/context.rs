//! Prompt context assembly.
//!
//! Builds the portion of the request payload shared by every task (the
//! document representation and the full attribute catalog) and splits it
//! from the per-task portion at a single cache-point marker. The split is
//! resolved once, at build time, into a typed `{static, dynamic}` pair so
//! the reuse boundary is part of the contract rather than a string
//! convention at each call site.

use base64::Engine as _;
use serde_json::Value;

use crate::config::AssessmentConfig;
use crate::error::AssessmentError;
use crate::schema::{AttributeNode, AttributeSchema};
use crate::tasks::{AssessmentTask, TaskKind};

/// Marker separating the cacheable document context from the per-task
/// portion of the prompt template.
pub const CACHE_POINT: &str = "<<CACHE_POINT>>";

/// Default assessment prompt. The text before the cache point is identical
/// for every task of one document and is marked reusable for the inference
/// backend; the text after it is rendered per task.
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"You review fields extracted from a document and judge how well each
extracted value is supported by the document itself.

<document>
{document_text}
</document>

Attribute catalog:
{attribute_catalog}

<<CACHE_POINT>>

Assess the following attributes:
{task_attributes}

Extracted values:
{task_values}

Respond with JSON mirroring the extracted values above: replace every leaf
value with an object of the form
{"confidence": 0.0, "confidence_reason": "short justification", "bbox": [x1, y1, x2, y2], "page": 1}.
confidence is between 0.0 and 1.0. bbox locates the supporting evidence on
a 0-1000 normalized coordinate scale and page is 1-based; omit bbox and
page when the field cannot be located.
"#;

/// A page image attached to the document context.
#[derive(Debug, Clone)]
pub struct DocumentPage {
    /// 1-based page number.
    pub page: u32,
    /// Raw image bytes (PNG or JPEG).
    pub image: Vec<u8>,
}

/// Document representation consumed by the context builder.
#[derive(Debug, Clone, Default)]
pub struct DocumentInput {
    pub text: String,
    pub pages: Vec<DocumentPage>,
}

impl DocumentInput {
    pub fn text_only(text: &str) -> Self {
        Self {
            text: text.to_string(),
            pages: Vec::new(),
        }
    }
}

/// A page image encoded for transport.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub page: u32,
    pub data: String,
}

/// Content identical across all tasks for one document. The invoker may
/// mark this segment for reuse/caching by the inference backend.
#[derive(Debug, Clone)]
pub struct StaticSegment {
    pub prompt: String,
    pub page_images: Vec<EncodedPage>,
    pub cacheable: bool,
}

/// The task-specific portion of one request.
#[derive(Debug, Clone)]
pub struct DynamicSegment {
    pub prompt: String,
    /// The task's extraction slice, shaped the way the response must be.
    pub values: Value,
}

/// Static segment plus the template the dynamic segments render from.
#[derive(Debug)]
pub struct PromptContext {
    static_segment: StaticSegment,
    dynamic_template: String,
}

impl PromptContext {
    pub fn static_segment(&self) -> &StaticSegment {
        &self.static_segment
    }

    /// Render the per-task portion of the request.
    pub fn dynamic_segment(&self, task: &AssessmentTask) -> DynamicSegment {
        let mut attribute_lines = String::new();
        if let TaskKind::ListItems { path, start, end } = &task.kind {
            attribute_lines.push_str(&format!("Items {start} through {} of {path}:\n", end - 1));
        }
        catalog_lines(&task.attributes, 0, &mut attribute_lines);

        let values_json = serde_json::to_string_pretty(&task.values)
            .unwrap_or_else(|_| task.values.to_string());
        let prompt = self
            .dynamic_template
            .replace("{task_attributes}", attribute_lines.trim_end())
            .replace("{task_values}", &values_json);

        DynamicSegment {
            prompt,
            values: task.values.clone(),
        }
    }
}

/// Assemble the shared prompt context for one document.
pub fn build_context(
    document: &DocumentInput,
    schema: &AttributeSchema,
    config: &AssessmentConfig,
) -> Result<PromptContext, AssessmentError> {
    let markers = config.prompt_template.matches(CACHE_POINT).count();
    if markers != 1 {
        return Err(AssessmentError::Config(format!(
            "prompt template must contain exactly one {CACHE_POINT} marker, found {markers}"
        )));
    }
    let (static_template, dynamic_template) = config
        .prompt_template
        .split_once(CACHE_POINT)
        .expect("marker count checked above");

    let mut catalog = String::new();
    catalog_lines(&schema.attributes, 0, &mut catalog);

    let prompt = static_template
        .replace("{document_text}", &document.text)
        .replace("{attribute_catalog}", catalog.trim_end());

    let page_images = document
        .pages
        .iter()
        .map(|p| EncodedPage {
            page: p.page,
            data: base64::engine::general_purpose::STANDARD.encode(&p.image),
        })
        .collect();

    Ok(PromptContext {
        static_segment: StaticSegment {
            prompt,
            page_images,
            cacheable: true,
        },
        dynamic_template: dynamic_template.to_string(),
    })
}

/// Render attribute catalog lines, one per node, nested children indented.
fn catalog_lines(nodes: &[AttributeNode], depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for node in nodes {
        let description = node.description();
        if description.is_empty() {
            out.push_str(&format!("{indent}- {} ({})\n", node.name(), node.kind_label()));
        } else {
            out.push_str(&format!(
                "{indent}- {} ({}): {description}\n",
                node.name(),
                node.kind_label()
            ));
        }
        match node {
            AttributeNode::Group { attributes, .. } => {
                catalog_lines(attributes, depth + 1, out);
            }
            AttributeNode::List { item, .. } => {
                catalog_lines(std::slice::from_ref(item.as_ref()), depth + 1, out);
            }
            AttributeNode::Simple { .. } => {}
        }
    }
}
