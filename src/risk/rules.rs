use super::{RiskLevel, RiskRule, RiskRuleInfo};
use crate::{config::Thresholds, plan::PlanAnalysis};

/// Estimated total cost above the configured maximum
pub struct TotalCost;

impl RiskRule for TotalCost {
    fn info(&self) -> RiskRuleInfo {
        RiskRuleInfo {
            id:    "RISK001",
            name:  "Total cost over limit",
            level: RiskLevel::Block
        }
    }

    fn check(&self, analysis: &PlanAnalysis, thresholds: &Thresholds) -> Option<String> {
        let cost = analysis.total_cost?;
        (cost > thresholds.max_total_cost)
            .then(|| format!("total_cost {} > {}", cost, thresholds.max_total_cost))
    }
}

/// Estimated row count above the configured maximum
pub struct EstimatedRows;

impl RiskRule for EstimatedRows {
    fn info(&self) -> RiskRuleInfo {
        RiskRuleInfo {
            id:    "RISK002",
            name:  "Estimated rows over limit",
            level: RiskLevel::Block
        }
    }

    fn check(&self, analysis: &PlanAnalysis, thresholds: &Thresholds) -> Option<String> {
        let rows = analysis.est_rows?;
        (rows > thresholds.max_est_rows)
            .then(|| format!("est_rows {} > {}", rows, thresholds.max_est_rows))
    }
}

/// Output row width above the configured maximum. Only ever warns.
pub struct PlanWidth;

impl RiskRule for PlanWidth {
    fn info(&self) -> RiskRuleInfo {
        RiskRuleInfo {
            id:    "RISK003",
            name:  "Wide result rows",
            level: RiskLevel::Warn
        }
    }

    fn check(&self, analysis: &PlanAnalysis, thresholds: &Thresholds) -> Option<String> {
        let width = analysis.plan_width?;
        (width > thresholds.max_width)
            .then(|| format!("plan_width {} > {}", width, thresholds.max_width))
    }
}

/// `SELECT *` projection
pub struct SelectStar;

impl RiskRule for SelectStar {
    fn info(&self) -> RiskRuleInfo {
        RiskRuleInfo {
            id:    "RISK004",
            name:  "Select star",
            level: RiskLevel::Warn
        }
    }

    fn check(&self, analysis: &PlanAnalysis, _thresholds: &Thresholds) -> Option<String> {
        analysis
            .select_star
            .then(|| "query selects '*' (wide results risk)".to_string())
    }
}

/// Join node without any join condition
pub struct CartesianJoin;

impl RiskRule for CartesianJoin {
    fn info(&self) -> RiskRuleInfo {
        RiskRuleInfo {
            id:    "RISK005",
            name:  "Cartesian join",
            level: RiskLevel::Block
        }
    }

    fn check(&self, analysis: &PlanAnalysis, thresholds: &Thresholds) -> Option<String> {
        if !thresholds.forbid_cartesian || analysis.cartesian_joins.is_empty() {
            return None;
        }
        let labels: Vec<&str> = analysis
            .cartesian_joins
            .iter()
            .map(|label| label.as_str())
            .collect();
        Some(format!("possible cartesian join(s): {}", labels.join(", ")))
    }
}
