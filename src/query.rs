//! SQL normalizer and read-only classifier.
//!
//! Classification is a pure function of the submitted text: nothing is
//! executed, nothing is cached, and classifying the same text twice yields
//! the same [`SqlStatement`].

mod extract;
mod types;

use std::sync::LazyLock;

use extract::collect_relations;
use rayon::prelude::*;
use regex::Regex;
use sqlparser::{
    ast::{SetExpr, Statement},
    dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SnowflakeDialect},
    parser::Parser
};
use tracing::debug;
pub use types::{SqlStatement, StatementKind, TableRef};

use crate::error::ClassificationError;

static FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|TRUNCATE|CREATE|GRANT|REVOKE)\b")
        .expect("valid regex")
});

/// SQL dialect for parsing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum SqlDialect {
    #[default]
    Generic,
    PostgreSQL,
    MySQL,
    Snowflake
}

impl SqlDialect {
    /// Convert to sqlparser dialect for parsing
    pub fn into_parser_dialect(self) -> Box<dyn Dialect> {
        match self {
            Self::Generic => Box::new(GenericDialect {}),
            Self::PostgreSQL => Box::new(PostgreSqlDialect {}),
            Self::MySQL => Box::new(MySqlDialect {}),
            Self::Snowflake => Box::new(SnowflakeDialect {})
        }
    }
}

/// Strip surrounding whitespace and trailing statement separators.
///
/// The result is the canonical text used for explain, execution and audit.
///
/// # Example
///
/// ```
/// use sql_approval_gate::query::normalize;
///
/// assert_eq!(normalize("SELECT 1;  \n"), "SELECT 1");
/// assert_eq!(normalize(&normalize(" SELECT 1 ;;")), "SELECT 1");
/// ```
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

/// First write/DDL/DCL keyword appearing as a whole word, uppercased.
///
/// Runs over raw text, so a keyword inside a sub-select, a comment or a
/// string literal is still reported.
pub fn forbidden_keyword(sql: &str) -> Option<String> {
    FORBIDDEN
        .find(sql)
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// Classify one submission as a single read-only SELECT.
///
/// # Errors
///
/// - [`ClassificationError::Forbidden`] when a write keyword appears anywhere
///   in the text (checked before parsing) or the query is `SELECT ... INTO`
/// - [`ClassificationError::Unparseable`] when the text does not parse
/// - [`ClassificationError::MultiStatement`] when more than one statement is
///   present
/// - [`ClassificationError::NotSelect`] when the root is not SELECT-shaped
pub fn classify(raw: &str, dialect: SqlDialect) -> Result<SqlStatement, ClassificationError> {
    let sql = normalize(raw);
    if let Some(keyword) = forbidden_keyword(&sql) {
        return Err(ClassificationError::Forbidden {
            keyword
        });
    }
    if sql.is_empty() {
        return Err(ClassificationError::Unparseable {
            message: "empty statement".to_string()
        });
    }

    let parser_dialect = dialect.into_parser_dialect();
    let mut statements = Parser::parse_sql(parser_dialect.as_ref(), &sql).map_err(|e| {
        ClassificationError::Unparseable {
            message: e.to_string()
        }
    })?;
    match statements.len() {
        0 => {
            return Err(ClassificationError::Unparseable {
                message: "no statement found".to_string()
            });
        }
        1 => {}
        count => {
            return Err(ClassificationError::MultiStatement {
                count
            });
        }
    }

    let statement = statements.remove(0);
    let Statement::Query(query) = &statement else {
        return Err(ClassificationError::NotSelect {
            kind: leading_keyword(&sql)
        });
    };
    if let Some(kind) = non_select_body(&query.body) {
        return Err(ClassificationError::NotSelect {
            kind: kind.to_string()
        });
    }
    if has_select_into(&query.body) {
        return Err(ClassificationError::Forbidden {
            keyword: "INTO".to_string()
        });
    }

    let relations = collect_relations(&statement);
    let mut stmt = SqlStatement::new(sql, StatementKind::Select);
    stmt.tables = relations.tables;
    stmt.cte_names = relations.cte_names;

    debug!(tables = ?stmt.table_names(), "statement classified");
    Ok(stmt)
}

/// Split a file of candidates into statements and classify each in parallel.
///
/// Results keep input order. Splitting honours quotes and comments, so a
/// `;` inside a literal does not end a statement.
pub fn parse_batch(
    sql: &str,
    dialect: SqlDialect
) -> Vec<Result<SqlStatement, ClassificationError>> {
    split_statements(sql)
        .par_iter()
        .map(|s| classify(s, dialect))
        .collect()
}

/// Split text on top-level `;`, skipping separators inside quotes and comments.
///
/// Comments are dropped along with empty pieces.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                if chars.peek() == Some(&q) {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else {
                    quote = None;
                }
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                current.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                current.push(' ');
            }
            ';' => {
                push_piece(&mut out, &mut current);
            }
            _ => current.push(c)
        }
    }
    push_piece(&mut out, &mut current);
    out
}

fn push_piece(out: &mut Vec<String>, current: &mut String) {
    let piece = current.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
    current.clear();
}

fn leading_keyword(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_ascii_alphabetic())
                .to_ascii_uppercase()
        })
        .filter(|w| !w.is_empty())
        .unwrap_or_else(|| "OTHER".to_string())
}

/// Label of the first non-SELECT branch in a query body, if any.
fn non_select_body(body: &SetExpr) -> Option<&'static str> {
    match body {
        SetExpr::Select(_) => None,
        SetExpr::Query(query) => non_select_body(&query.body),
        SetExpr::SetOperation {
            left,
            right,
            ..
        } => non_select_body(left).or_else(|| non_select_body(right)),
        SetExpr::Values(_) => Some("VALUES"),
        SetExpr::Table(_) => Some("TABLE"),
        _ => Some("OTHER")
    }
}

fn has_select_into(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::Query(query) => has_select_into(&query.body),
        SetExpr::SetOperation {
            left,
            right,
            ..
        } => has_select_into(left) || has_select_into(right),
        _ => false
    }
}
