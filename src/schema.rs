//! Attribute schema model.
//!
//! A schema describes the shape of an extraction result as a tree of
//! attribute nodes. Simple nodes are the unit of assessment; group nodes own
//! an ordered set of children; list nodes own one item template applied to
//! every element of the corresponding result array.

use serde::{Deserialize, Serialize};

/// A node in the attribute schema tree.
///
/// Closed tagged union so task building can pattern-match on the node kind
/// instead of inspecting value shapes at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeNode {
    /// A scalar field receiving one confidence assessment.
    Simple {
        name: String,
        #[serde(default)]
        description: String,
    },
    /// A named object owning ordered child attributes.
    Group {
        name: String,
        #[serde(default)]
        description: String,
        attributes: Vec<AttributeNode>,
    },
    /// A homogeneous array; `item` describes the shape of every element.
    List {
        name: String,
        #[serde(default)]
        description: String,
        item: Box<AttributeNode>,
    },
}

impl AttributeNode {
    pub fn simple(name: &str) -> Self {
        Self::Simple {
            name: name.to_string(),
            description: String::new(),
        }
    }

    pub fn group(name: &str, attributes: Vec<AttributeNode>) -> Self {
        Self::Group {
            name: name.to_string(),
            description: String::new(),
            attributes,
        }
    }

    pub fn list(name: &str, item: AttributeNode) -> Self {
        Self::List {
            name: name.to_string(),
            description: String::new(),
            item: Box::new(item),
        }
    }

    pub fn with_description(mut self, text: &str) -> Self {
        match &mut self {
            Self::Simple { description, .. }
            | Self::Group { description, .. }
            | Self::List { description, .. } => *description = text.to_string(),
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Simple { name, .. } | Self::Group { name, .. } | Self::List { name, .. } => name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Simple { description, .. }
            | Self::Group { description, .. }
            | Self::List { description, .. } => description,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Simple { .. } => "simple",
            Self::Group { .. } => "group",
            Self::List { .. } => "list",
        }
    }
}

/// Ordered root attribute list for one document class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub attributes: Vec<AttributeNode>,
}

impl AttributeSchema {
    pub fn new(attributes: Vec<AttributeNode>) -> Self {
        Self { attributes }
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}
