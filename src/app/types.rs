//! Application types for CLI commands.
//!
//! Command results carry the rendered text plus the exit code, so commands
//! can be tested without touching stdout.

use serde::Serialize;

use crate::connector::{BackendKind, ConnectionInfo, ReadOnlyLevel};

/// Offline check result for one statement.
///
/// # Example
///
/// ```
/// use sql_approval_gate::app::LintEntry;
///
/// let entry = LintEntry {
///     index:  0,
///     sql:    "SELECT 1".to_string(),
///     tables: Vec::new(),
///     reason: None
/// };
/// assert!(entry.passed());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LintEntry {
    /// Position of the statement in the input
    pub index:  usize,
    /// Normalized text when classification succeeded, raw text otherwise
    pub sql:    String,
    pub tables: Vec<String>,
    /// Rejection reason; `None` when the statement passed
    pub reason: Option<String>
}

impl LintEntry {
    pub fn passed(&self) -> bool {
        self.reason.is_none()
    }
}

/// Connectivity probe plus the read-only level the backend reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingReport {
    pub backend:   BackendKind,
    pub info:      ConnectionInfo,
    pub read_only: ReadOnlyLevel
}

/// Output from CLI command execution.
///
/// # Example
///
/// ```
/// use sql_approval_gate::app::CommandOutput;
///
/// let output = CommandOutput {
///     exit_code: 0,
///     stdout:    "Verdict: OK".to_string()
/// };
/// assert_eq!(output.exit_code, 0);
/// ```
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code for the process (0=ok, 1=warn, 2=block or rejected).
    pub exit_code: i32,
    /// Rendered output for stdout
    pub stdout:    String
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into()
        }
    }
}
