//! Normalized plan tree and the aggregate metrics derived from it.

use std::fmt;

use compact_str::CompactString;
use serde::Serialize;
use serde_json::{Map, Value};
use smallvec::SmallVec;

/// Join-condition key found on a plan node.
///
/// A join node carrying none of these is treated as a cartesian product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JoinMarker {
    HashCond,
    MergeCond,
    JoinFilter
}

impl JoinMarker {
    pub const ALL: [JoinMarker; 3] = [Self::HashCond, Self::MergeCond, Self::JoinFilter];

    /// Key under which the marker appears in a JSON plan node
    pub fn key(self) -> &'static str {
        match self {
            Self::HashCond => "Hash Cond",
            Self::MergeCond => "Merge Cond",
            Self::JoinFilter => "Join Filter"
        }
    }
}

impl fmt::Display for JoinMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// One node of a normalized plan tree.
///
/// Numeric estimates are in backend units and comparable only within one
/// backend. `None` means the backend did not report the value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanNode {
    pub node_type:    CompactString,
    pub total_cost:   Option<f64>,
    pub plan_rows:    Option<f64>,
    pub plan_width:   Option<f64>,
    pub children:     Vec<PlanNode>,
    pub join_markers: SmallVec<[JoinMarker; 3]>
}

impl PlanNode {
    pub fn new(node_type: impl Into<CompactString>) -> Self {
        Self {
            node_type:    node_type.into(),
            total_cost:   None,
            plan_rows:    None,
            plan_width:   None,
            children:     Vec::new(),
            join_markers: SmallVec::new()
        }
    }

    pub fn with_metrics(
        mut self,
        total_cost: Option<f64>,
        plan_rows: Option<f64>,
        plan_width: Option<f64>
    ) -> Self {
        self.total_cost = total_cost;
        self.plan_rows = plan_rows;
        self.plan_width = plan_width;
        self
    }

    pub fn with_marker(mut self, marker: JoinMarker) -> Self {
        if !self.join_markers.contains(&marker) {
            self.join_markers.push(marker);
        }
        self
    }

    pub fn with_child(mut self, child: PlanNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_join(&self) -> bool {
        self.node_type.contains("Join")
    }
}

/// Backend-native EXPLAIN output, tagged by shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", content = "plan", rename_all = "snake_case")]
pub enum NativePlan {
    /// Nested JSON plan (`EXPLAIN (FORMAT JSON)`)
    JsonTree(Value),
    /// One object per plan row (classic `EXPLAIN`)
    RowList(Vec<Map<String, Value>>),
    /// Free text with no structured estimates
    Text(String)
}

/// Risk metrics derived from a plan tree plus the raw SQL text.
///
/// Numeric fields are `None` when the backend gives no estimate; that is
/// distinct from a zero estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanAnalysis {
    pub total_cost:      Option<f64>,
    pub est_rows:        Option<f64>,
    pub plan_width:      Option<f64>,
    pub select_star:     bool,
    pub has_seqscan:     bool,
    pub cartesian_joins: Vec<CompactString>
}
