//! Request and result types of the execution gate.

use serde::Serialize;

use crate::{
    audit::{AuditEvent, RejectedAttempt},
    connector::ResultSet,
    query::SqlStatement,
    risk::SafetyVerdict
};

/// A classified, whitelisted and assessed statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Review {
    pub statement: SqlStatement,
    pub verdict:   SafetyVerdict
}

/// Input of [`Gate::approve_and_execute`](super::Gate::approve_and_execute).
///
/// `None` limits fall back to the gate's execution config.
#[derive(Debug, Clone, Default)]
pub struct ApprovalRequest {
    pub sql:            String,
    pub question:       Option<String>,
    pub allowed_tables: Vec<String>,
    pub row_cap:        Option<usize>,
    pub preview_rows:   Option<usize>,
    /// Rejected candidates that preceded this statement
    pub attempts:       Vec<RejectedAttempt>
}

impl ApprovalRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn allow<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.allowed_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    pub fn row_cap(mut self, row_cap: usize) -> Self {
        self.row_cap = Some(row_cap);
        self
    }
}

/// Approved execution: the stored event plus the rows it describes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Approval {
    pub event:   AuditEvent,
    pub verdict: SafetyVerdict,
    pub result:  ResultSet
}

/// Outcome of screening several candidate statements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Screening {
    /// Index and review of the first candidate that is not blocked
    pub selected: Option<(usize, Review)>,
    /// Every candidate rejected before the selected one, in order
    pub attempts: Vec<RejectedAttempt>
}
