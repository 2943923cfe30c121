//! Verdict types for the risk threshold engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{config::Thresholds, plan::PlanAnalysis};

/// Severity of a verdict.
///
/// Ordered so that combining levels is `max`: block dominates warn
/// dominates ok.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Ok,
    Warn,
    Block
}

impl RiskLevel {
    /// Process exit code for this level (0, 1, or 2)
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Warn => 1,
            Self::Block => 2
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warn => write!(f, "warn"),
            Self::Block => write!(f, "block")
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ok" => Ok(Self::Ok),
            "warn" => Ok(Self::Warn),
            "block" => Ok(Self::Block),
            other => Err(format!("unknown risk level '{}'", other))
        }
    }
}

/// Metadata about a risk rule.
#[derive(Debug, Clone)]
pub struct RiskRuleInfo {
    /// Unique rule identifier (e.g., "RISK001")
    pub id:    &'static str,
    pub name:  &'static str,
    /// Level raised when the rule fires
    pub level: RiskLevel
}

/// Outcome of risk assessment for one statement.
///
/// Reasons keep rule order: cost, rows, width, select-star, cartesian.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyVerdict {
    pub level:      RiskLevel,
    pub reasons:    Vec<String>,
    pub metrics:    PlanAnalysis,
    pub thresholds: Thresholds
}

impl SafetyVerdict {
    pub fn is_blocked(&self) -> bool {
        self.level == RiskLevel::Block
    }
}
