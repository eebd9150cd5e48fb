//! Schema analysis.
//!
//! Walks an attribute schema against the extraction result it must assess
//! and produces the ordered list of assessable leaf paths. Pure function of
//! its inputs; the walk is also reused by the task builder to collect the
//! leaves covered by one subtree.
//!
//! Group nodes are traversed depth-first in schema-declared order. List
//! nodes follow the result's actual item count, since list length is
//! runtime data. Attributes absent from the result were pruned upstream and
//! are skipped; a present value whose shape disagrees with the schema is a
//! `SchemaMismatch`.

use serde_json::Value;

use crate::error::AssessmentError;
use crate::path::LeafPath;
use crate::schema::{AttributeNode, AttributeSchema};

/// Produce the ordered list of assessable leaf paths for one run.
pub fn analyze(
    schema: &AttributeSchema,
    extraction: &Value,
) -> Result<Vec<LeafPath>, AssessmentError> {
    let root = extraction
        .as_object()
        .ok_or_else(|| AssessmentError::SchemaMismatch {
            path: "$".to_string(),
            detail: "extraction root is not an object".to_string(),
        })?;

    let mut paths = Vec::new();
    for node in &schema.attributes {
        collect_node(node, root.get(node.name()), &LeafPath::root(), &mut paths)?;
    }
    Ok(paths)
}

/// Collect the leaves of one schema node applied to its result value.
///
/// `value` is `None` when the attribute was pruned upstream; the subtree is
/// skipped. Null container values are treated the same way.
pub(crate) fn collect_node(
    node: &AttributeNode,
    value: Option<&Value>,
    prefix: &LeafPath,
    out: &mut Vec<LeafPath>,
) -> Result<(), AssessmentError> {
    let Some(value) = value else {
        return Ok(());
    };

    match node {
        AttributeNode::Simple { name, .. } => {
            let path = prefix.child(name);
            if value.is_object() || value.is_array() {
                return Err(AssessmentError::SchemaMismatch {
                    path: path.to_string(),
                    detail: "expected a scalar for a simple attribute".to_string(),
                });
            }
            out.push(path);
        }
        AttributeNode::Group { name, attributes, .. } => {
            if value.is_null() {
                return Ok(());
            }
            let path = prefix.child(name);
            let object = value
                .as_object()
                .ok_or_else(|| AssessmentError::SchemaMismatch {
                    path: path.to_string(),
                    detail: "group value is not an object".to_string(),
                })?;
            for child in attributes {
                collect_node(child, object.get(child.name()), &path, out)?;
            }
        }
        AttributeNode::List { name, item, .. } => {
            if value.is_null() {
                return Ok(());
            }
            let path = prefix.child(name);
            let items = value
                .as_array()
                .ok_or_else(|| AssessmentError::SchemaMismatch {
                    path: path.to_string(),
                    detail: "list value is not an array".to_string(),
                })?;
            for (index, element) in items.iter().enumerate() {
                collect_list_element(item, element, &path.item(index), out)?;
            }
        }
    }
    Ok(())
}

/// Apply a list's item template to one element.
///
/// The item template is anonymous in the value shape: a group template's
/// children sit directly on the element object, and a simple template means
/// the element itself is the leaf.
pub(crate) fn collect_list_element(
    template: &AttributeNode,
    element: &Value,
    item_path: &LeafPath,
    out: &mut Vec<LeafPath>,
) -> Result<(), AssessmentError> {
    match template {
        AttributeNode::Simple { .. } => {
            if element.is_object() || element.is_array() {
                return Err(AssessmentError::SchemaMismatch {
                    path: item_path.to_string(),
                    detail: "expected a scalar list item".to_string(),
                });
            }
            out.push(item_path.clone());
        }
        AttributeNode::Group { attributes, .. } => {
            if element.is_null() {
                return Ok(());
            }
            let object = element
                .as_object()
                .ok_or_else(|| AssessmentError::SchemaMismatch {
                    path: item_path.to_string(),
                    detail: "list item is not an object".to_string(),
                })?;
            for child in attributes {
                collect_node(child, object.get(child.name()), item_path, out)?;
            }
        }
        AttributeNode::List { item, .. } => {
            if element.is_null() {
                return Ok(());
            }
            let items = element
                .as_array()
                .ok_or_else(|| AssessmentError::SchemaMismatch {
                    path: item_path.to_string(),
                    detail: "nested list item is not an array".to_string(),
                })?;
            for (index, nested) in items.iter().enumerate() {
                collect_list_element(item, nested, &item_path.item(index), out)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bank_schema() -> AttributeSchema {
        AttributeSchema::new(vec![
            AttributeNode::simple("DocumentDate"),
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

    fn bank_result() -> Value {
        json!({
            "DocumentDate": "2026-03-01",
            "AccountDetails": {
                "AccountNumber": "12345678",
                "AccountHolder": "J. Doe"
            },
            "Transactions": [
                {"Date": "2026-02-27", "Amount": "12.50"},
                {"Date": "2026-02-28", "Amount": "-3.10"}
            ]
        })
    }

    #[test]
    fn collects_all_leaves_in_order() {
        let paths = analyze(&bank_schema(), &bank_result()).unwrap();
        let rendered: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "DocumentDate",
                "AccountDetails.AccountNumber",
                "AccountDetails.AccountHolder",
                "Transactions[0].Date",
                "Transactions[0].Amount",
                "Transactions[1].Date",
                "Transactions[1].Amount",
            ]
        );
    }

    #[test]
    fn no_duplicate_paths() {
        let paths = analyze(&bank_schema(), &bank_result()).unwrap();
        let mut deduped = paths.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), paths.len());
    }

    #[test]
    fn pruned_attribute_skipped() {
        let result = json!({
            "DocumentDate": "2026-03-01",
            "Transactions": []
        });
        let paths = analyze(&bank_schema(), &result).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].to_string(), "DocumentDate");
    }

    #[test]
    fn null_leaf_is_assessable() {
        let result = json!({"DocumentDate": null});
        let paths = analyze(&bank_schema(), &result).unwrap();
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn group_value_must_be_object() {
        let result = json!({"AccountDetails": "not an object"});
        let err = analyze(&bank_schema(), &result).unwrap_err();
        assert!(matches!(err, AssessmentError::SchemaMismatch { path, .. } if path == "AccountDetails"));
    }

    #[test]
    fn list_value_must_be_array() {
        let result = json!({"Transactions": {"Date": "2026-02-27"}});
        let err = analyze(&bank_schema(), &result).unwrap_err();
        assert!(matches!(err, AssessmentError::SchemaMismatch { path, .. } if path == "Transactions"));
    }

    #[test]
    fn simple_value_must_be_scalar() {
        let result = json!({"DocumentDate": {"year": 2026}});
        let err = analyze(&bank_schema(), &result).unwrap_err();
        assert!(matches!(err, AssessmentError::SchemaMismatch { path, .. } if path == "DocumentDate"));
    }

    #[test]
    fn root_must_be_object() {
        let err = analyze(&bank_schema(), &json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, AssessmentError::SchemaMismatch { .. }));
    }

    #[test]
    fn list_of_scalars() {
        let schema = AttributeSchema::new(vec![AttributeNode::list(
            "Tags",
            AttributeNode::simple("Tag"),
        )]);
        let result = json!({"Tags": ["a", "b", "c"]});
        let paths = analyze(&schema, &result).unwrap();
        let rendered: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, vec!["Tags[0]", "Tags[1]", "Tags[2]"]);
    }

    #[test]
    fn nested_list_inside_list_item() {
        let schema = AttributeSchema::new(vec![AttributeNode::list(
            "Orders",
            AttributeNode::group(
                "Order",
                vec![
                    AttributeNode::simple("OrderId"),
                    AttributeNode::list(
                        "Lines",
                        AttributeNode::group("Line", vec![AttributeNode::simple("Sku")]),
                    ),
                ],
            ),
        )]);
        let result = json!({
            "Orders": [
                {"OrderId": "A-1", "Lines": [{"Sku": "X"}, {"Sku": "Y"}]}
            ]
        });
        let paths = analyze(&schema, &result).unwrap();
        let rendered: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["Orders[0].OrderId", "Orders[0].Lines[0].Sku", "Orders[0].Lines[1].Sku"]
        );
    }

    #[test]
    fn empty_result_yields_no_paths() {
        let paths = analyze(&bank_schema(), &json!({})).unwrap();
        assert!(paths.is_empty());
    }
}
