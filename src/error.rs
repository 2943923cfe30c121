//! Error taxonomy for the approval gate.
//!
//! Domain failures are typed so callers can branch on them; every variant
//! renders as a plain reason string with the literal offending value
//! embedded. At the application boundary they collapse into
//! [`AppError`] via `From<GateError>`.

use thiserror::Error;

pub use masterror::{AppError, AppResult};

/// Rejection produced by the SQL classifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    /// A write/DDL/DCL keyword appears as a whole word anywhere in the text
    #[error("forbidden_keyword:{keyword}")]
    Forbidden { keyword: String },
    /// The text could not be parsed as SQL
    #[error("parse_error:{message}")]
    Unparseable { message: String },
    /// More than one statement in a single submission
    #[error("multi_statement:{count}")]
    MultiStatement { count: usize },
    /// Parsed fine, but the root statement is not a SELECT
    #[error("not_select:{kind}")]
    NotSelect { kind: String }
}

/// Rejection produced by the table whitelist enforcer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WhitelistRejection {
    #[error("blocked_schema")]
    BlockedSchema { schema: String },
    #[error("unknown_table:{table}")]
    UnknownTable { table: String }
}

/// Backend failure. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("unreachable: {message}")]
    Unreachable { message: String },
    #[error("auth_failed: {message}")]
    AuthFailed { message: String },
    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("syntax_error: {message}")]
    SyntaxError { message: String },
    #[error("unsupported: {message}")]
    Unsupported { message: String }
}

impl ConnectorError {
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable {
            message: msg.into()
        }
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthFailed {
            message: msg.into()
        }
    }

    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::SyntaxError {
            message: msg.into()
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into()
        }
    }
}

/// Failure of the bounded execution step.
///
/// Hitting the row cap is not an error: the result set comes back with
/// `truncated = true` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("timeout_exceeded:{budget_ms}ms")]
    TimeoutExceeded { budget_ms: u64 },
    #[error(transparent)]
    Connector(#[from] ConnectorError)
}

/// Anything that can stop a request inside the gate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GateError {
    #[error(transparent)]
    Classification(#[from] ClassificationError),
    #[error(transparent)]
    Whitelist(#[from] WhitelistRejection),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("blocked: {}", .reasons.join("; "))]
    Blocked { reasons: Vec<String> },
    #[error("plan_shape: {message}")]
    Plan { message: String },
    #[error("provenance: {message}")]
    Provenance { message: String },
    #[error("audit: {message}")]
    Audit { message: String }
}

pub type GateResult<T> = Result<T, GateError>;

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Classification(ClassificationError::Unparseable {
                message
            }) => query_parse_error(message),
            GateError::Classification(e) => AppError::bad_request(e.to_string()),
            GateError::Whitelist(e) => AppError::forbidden(e.to_string()),
            GateError::Blocked {
                ..
            } => AppError::forbidden(err.to_string()),
            GateError::Connector(e)
            | GateError::Execution(ExecutionError::Connector(e)) => connector_app_error(e),
            GateError::Execution(e) => AppError::timeout(e.to_string()),
            GateError::Provenance {
                ..
            } => AppError::service(err.to_string()),
            GateError::Plan {
                ..
            }
            | GateError::Audit {
                ..
            } => AppError::internal(err.to_string())
        }
    }
}

fn connector_app_error(err: ConnectorError) -> AppError {
    let msg = err.to_string();
    match err {
        ConnectorError::AuthFailed {
            ..
        } => AppError::unauthorized(msg),
        ConnectorError::Timeout {
            ..
        } => AppError::timeout(msg),
        ConnectorError::SyntaxError {
            ..
        } => AppError::bad_request(msg),
        ConnectorError::Unreachable {
            ..
        }
        | ConnectorError::Unsupported {
            ..
        } => AppError::service(msg)
    }
}

/// Create file read error
pub fn file_read_error(path: &str, source: std::io::Error) -> AppError {
    AppError::internal(format!("Failed to read file '{}': {}", path, source))
}

/// Create query parse error with optional position info
pub fn query_parse_error(message: impl Into<String>) -> AppError {
    let msg = message.into();
    AppError::bad_request(format_sql_error("Query parse error", &msg))
}

/// Create config error
pub fn config_error(message: impl Into<String>) -> AppError {
    AppError::bad_request(message.into())
}

/// Create audit store error
pub fn audit_error(message: impl Into<String>) -> AppError {
    AppError::internal(message.into())
}

/// Format SQL error with position highlighting
fn format_sql_error(prefix: &str, message: &str) -> String {
    // sqlparser format: "... at Line: X, Column Y"
    if let Some(pos) = extract_position(message) {
        format!(
            "{} at line {}, column {}:\n  {}",
            prefix, pos.line, pos.column, message
        )
    } else {
        format!("{}:\n  {}", prefix, message)
    }
}

struct SqlPosition {
    line:   usize,
    column: usize
}

fn extract_position(message: &str) -> Option<SqlPosition> {
    let line_marker = "Line: ";
    let col_marker = ", Column ";

    let line_start = message.find(line_marker)?;
    let line_num_start = line_start + line_marker.len();
    let col_start = message[line_num_start..].find(col_marker)?;
    let line_str = &message[line_num_start..line_num_start + col_start];
    let col_num_start = line_num_start + col_start + col_marker.len();
    let col_end = message[col_num_start..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(message.len() - col_num_start);
    let col_str = &message[col_num_start..col_num_start + col_end];

    match (line_str.parse(), col_str.parse()) {
        (Ok(line), Ok(column)) => Some(SqlPosition {
            line,
            column
        }),
        _ => None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_position() {
        let pos = extract_position("Expected end of statement at Line: 3, Column 17").unwrap();
        assert_eq!(pos.line, 3);
        assert_eq!(pos.column, 17);
    }

    #[test]
    fn test_extract_position_missing() {
        assert!(extract_position("no position here").is_none());
    }

    #[test]
    fn test_format_sql_error_with_position() {
        let msg = format_sql_error("Query parse error", "oops at Line: 1, Column 5");
        assert!(msg.starts_with("Query parse error at line 1, column 5"));
    }
}
