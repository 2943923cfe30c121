//! Risk threshold engine.
//!
//! Maps [`PlanAnalysis`] metrics to a [`SafetyVerdict`]. Each metric is
//! checked by its own [`RiskRule`]; rules run in a fixed order so the reason
//! list is deterministic, and the verdict level is the highest level among
//! the rules that fired.
//!
//! | ID | Condition | Level |
//! |----|-----------|-------|
//! | RISK001 | `total_cost` over `max_total_cost` | block |
//! | RISK002 | `est_rows` over `max_est_rows` | block |
//! | RISK003 | `plan_width` over `max_width` | warn |
//! | RISK004 | projection is `SELECT *` | warn |
//! | RISK005 | cartesian join while `forbid_cartesian` | block |
//!
//! A metric the backend did not report skips its rule.

mod rules;
mod types;

use tracing::warn;
pub use types::{RiskLevel, RiskRuleInfo, SafetyVerdict};

use crate::{config::Thresholds, plan::PlanAnalysis};

/// One threshold check over plan metrics.
///
/// Returns the reason text when the rule fires. Rules are stateless and
/// must be `Send + Sync` so a runner can be shared across requests.
pub trait RiskRule: Send + Sync {
    fn info(&self) -> RiskRuleInfo;

    fn check(&self, analysis: &PlanAnalysis, thresholds: &Thresholds) -> Option<String>;
}

/// Ordered set of risk rules.
pub struct RiskRunner {
    rules: Vec<Box<dyn RiskRule>>
}

impl Default for RiskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskRunner {
    /// Runner with the built-in rules in reporting order
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(rules::TotalCost),
                Box::new(rules::EstimatedRows),
                Box::new(rules::PlanWidth),
                Box::new(rules::SelectStar),
                Box::new(rules::CartesianJoin)
            ]
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = RiskRuleInfo> + '_ {
        self.rules.iter().map(|r| r.info())
    }

    pub fn assess(&self, analysis: &PlanAnalysis, thresholds: &Thresholds) -> SafetyVerdict {
        let mut level = RiskLevel::Ok;
        let mut reasons = Vec::new();
        for rule in &self.rules {
            if let Some(reason) = rule.check(analysis, thresholds) {
                let info = rule.info();
                level = level.max(info.level);
                reasons.push(reason);
            }
        }
        if level == RiskLevel::Block {
            warn!(reasons = ?reasons, "statement blocked by risk thresholds");
        }
        SafetyVerdict {
            level,
            reasons,
            metrics: analysis.clone(),
            thresholds: thresholds.clone()
        }
    }
}

/// Assess metrics against thresholds with the built-in rules.
///
/// # Example
///
/// ```
/// use sql_approval_gate::{
///     config::Thresholds,
///     plan::PlanAnalysis,
///     risk::{RiskLevel, assess}
/// };
///
/// let metrics = PlanAnalysis {
///     total_cost: Some(2_000_000.0),
///     est_rows: Some(10.0),
///     plan_width: Some(50.0),
///     ..Default::default()
/// };
/// let verdict = assess(&metrics, &Thresholds::default());
/// assert_eq!(verdict.level, RiskLevel::Block);
/// assert_eq!(verdict.reasons, vec!["total_cost 2000000 > 1000000"]);
/// ```
pub fn assess(analysis: &PlanAnalysis, thresholds: &Thresholds) -> SafetyVerdict {
    RiskRunner::new().assess(analysis, thresholds)
}
