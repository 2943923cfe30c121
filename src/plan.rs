//! EXPLAIN plan analyzer.
//!
//! Each backend's native plan is adapted into a common [`PlanNode`] tree,
//! then a single depth-first walk derives the [`PlanAnalysis`] metrics.
//! Backend-specific branching stops here: nothing downstream looks at the
//! native shape.
//!
//! | Shape | Backend | Full-scan marker |
//! |-------|---------|------------------|
//! | JSON tree | PostgreSQL | `Seq Scan` |
//! | Row list | MySQL | `ALL` |
//! | Text | Snowflake | none |

mod adapt;
mod types;

use std::sync::LazyLock;

pub use adapt::{ROW_LIST_ROOT, adapt};
use regex::Regex;
use tracing::debug;
pub use types::{JoinMarker, NativePlan, PlanAnalysis, PlanNode};

use crate::{connector::BackendKind, error::GateResult};

static SELECT_STAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*select\s+\*").expect("valid regex"));

/// Analyze a native plan for the given backend.
///
/// # Errors
///
/// Returns [`GateError::Plan`](crate::error::GateError::Plan) when a
/// structured plan has an unexpected shape.
pub fn analyze(
    native: &NativePlan,
    raw_sql: &str,
    backend: BackendKind
) -> GateResult<PlanAnalysis> {
    let root = adapt(native)?;
    let analysis = analyze_tree(root.as_ref(), raw_sql, backend);
    debug!(
        backend = %backend,
        total_cost = ?analysis.total_cost,
        est_rows = ?analysis.est_rows,
        cartesian = analysis.cartesian_joins.len(),
        "plan analyzed"
    );
    Ok(analysis)
}

/// Derive metrics from an already adapted tree.
///
/// `total_cost`, `est_rows` and `plan_width` come from the root. Without a
/// tree every numeric metric is absent.
pub fn analyze_tree(root: Option<&PlanNode>, raw_sql: &str, backend: BackendKind) -> PlanAnalysis {
    let mut analysis = PlanAnalysis {
        select_star: is_select_star(raw_sql),
        ..PlanAnalysis::default()
    };
    if let Some(root) = root {
        analysis.total_cost = root.total_cost;
        analysis.est_rows = root.plan_rows;
        analysis.plan_width = root.plan_width;
        walk(root, backend.full_scan_marker(), &mut analysis);
    }
    analysis
}

/// Whether the statement text starts with `SELECT *`.
pub fn is_select_star(raw_sql: &str) -> bool {
    SELECT_STAR.is_match(raw_sql)
}

fn walk(node: &PlanNode, full_scan: Option<&str>, analysis: &mut PlanAnalysis) {
    if full_scan.is_some_and(|marker| node.node_type == marker) {
        analysis.has_seqscan = true;
    }
    if node.is_join() && node.join_markers.is_empty() {
        analysis.cartesian_joins.push(node.node_type.clone());
    }
    for child in &node.children {
        walk(child, full_scan, analysis);
    }
}
