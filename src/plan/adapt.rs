//! Per-shape adapters from native EXPLAIN output into [`PlanNode`] trees.

use serde_json::{Map, Value};

use super::types::{JoinMarker, NativePlan, PlanNode};
use crate::error::{GateError, GateResult};

/// Label of the synthesized root for row-list plans
pub const ROW_LIST_ROOT: &str = "Query";

/// Adapt a native plan into the common tree.
///
/// Text plans carry no structure and yield `None`.
///
/// # Errors
///
/// Returns [`GateError::Plan`] when a JSON plan does not have the expected
/// shape.
pub fn adapt(native: &NativePlan) -> GateResult<Option<PlanNode>> {
    match native {
        NativePlan::JsonTree(value) => adapt_json_tree(value).map(Some),
        NativePlan::RowList(rows) => Ok(Some(adapt_row_list(rows))),
        NativePlan::Text(_) => Ok(None)
    }
}

/// Accepts either the full `[{"Plan": {...}}]` document, a single
/// `{"Plan": {...}}` object, or a bare node.
fn adapt_json_tree(value: &Value) -> GateResult<PlanNode> {
    let root = match value {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| plan_shape("empty plan document"))?,
        other => other
    };
    let node = match root.get("Plan") {
        Some(plan) => plan,
        None => root
    };
    json_node(node)
}

fn json_node(value: &Value) -> GateResult<PlanNode> {
    let obj = value
        .as_object()
        .ok_or_else(|| plan_shape("plan node is not an object"))?;
    let node_type = obj
        .get("Node Type")
        .and_then(Value::as_str)
        .ok_or_else(|| plan_shape("plan node without \"Node Type\""))?;

    let mut node = PlanNode::new(node_type).with_metrics(
        number(obj.get("Total Cost")),
        number(obj.get("Plan Rows")),
        number(obj.get("Plan Width"))
    );
    for marker in JoinMarker::ALL {
        if obj.contains_key(marker.key()) {
            node = node.with_marker(marker);
        }
    }
    if let Some(children) = obj.get("Plans") {
        let children = children
            .as_array()
            .ok_or_else(|| plan_shape("\"Plans\" is not an array"))?;
        for child in children {
            node.children.push(json_node(child)?);
        }
    }
    Ok(node)
}

/// Synthesize a one-level tree: the root's row estimate is the sum over all
/// rows that report one, each child is labeled with its access type.
fn adapt_row_list(rows: &[Map<String, Value>]) -> PlanNode {
    let mut root = PlanNode::new(ROW_LIST_ROOT);
    let mut total: Option<f64> = None;
    for row in rows {
        let estimate = number(row.get("rows"));
        if let Some(n) = estimate {
            total = Some(total.unwrap_or(0.0) + n);
        }
        let access = row
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("NULL");
        root.children
            .push(PlanNode::new(access).with_metrics(None, estimate, None));
    }
    root.plan_rows = total;
    root
}

/// JSON number, or a string holding one (drivers disagree on BIGINT UNSIGNED).
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None
    }
}

fn plan_shape(message: &str) -> GateError {
    GateError::Plan {
        message: message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_number_from_string() {
        assert_eq!(number(Some(&json!("42"))), Some(42.0));
        assert_eq!(number(Some(&json!(null))), None);
        assert_eq!(number(None), None);
    }

    #[test]
    fn test_bare_node_accepted() {
        let node = adapt_json_tree(&json!({"Node Type": "Result", "Total Cost": 0.01})).unwrap();
        assert_eq!(node.node_type, "Result");
        assert_eq!(node.total_cost, Some(0.01));
    }

    #[test]
    fn test_missing_node_type_rejected() {
        let err = adapt_json_tree(&json!([{"Plan": {"Total Cost": 1}}])).unwrap_err();
        assert!(matches!(err, GateError::Plan { .. }));
    }

    #[test]
    fn test_row_list_without_estimates() {
        let mut row = Map::new();
        row.insert("type".into(), json!("ALL"));
        let root = adapt_row_list(&[row]);
        assert_eq!(root.plan_rows, None);
        assert_eq!(root.children[0].node_type, "ALL");
    }
}
