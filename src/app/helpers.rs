//! Helper functions for CLI operations.
//!
//! Input reading, whitelist resolution, offline linting and gate wiring
//! shared by the command handlers.

use std::{
    fs::read_to_string,
    io::{self, Read},
    sync::Arc,
    time::Duration
};

use indicatif::{ProgressBar, ProgressStyle};

use super::{convert::convert_format, types::LintEntry};
use crate::{
    audit::AuditStore,
    cli::{Format, SqlInput},
    config::Config,
    connector::{AnyConnector, BackendKind},
    error::{AppResult, GateError, config_error, file_read_error},
    gate::Gate,
    output::{OutputFormat, OutputOptions},
    provenance::{NoProvenance, PgIngestionLog, ProvenanceSource},
    query::{SqlDialect, parse_batch, split_statements},
    whitelist::{blocked_schemas, enforce}
};

/// Gate wired from configuration, backend picked at runtime.
pub type AppGate = Gate<AnyConnector, Box<dyn ProvenanceSource>>;

/// Reads SQL text from `--sql`, a file, or stdin when the file is "-".
///
/// # Errors
///
/// Returns an error if the file cannot be read or stdin fails.
pub fn read_sql_input(input: &SqlInput) -> AppResult<String> {
    if let Some(sql) = &input.sql {
        return Ok(sql.clone());
    }
    let Some(path) = &input.file else {
        return Err(config_error("either --sql or --file is required"));
    };
    if path.to_str() == Some("-") {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| file_read_error("stdin", e))?;
        Ok(buffer)
    } else {
        let display = path.display().to_string();
        read_to_string(path).map_err(|e| file_read_error(&display, e))
    }
}

/// Creates output options from CLI parameters.
///
/// # Example
///
/// ```
/// use sql_approval_gate::{app::create_output_options, cli::Format};
///
/// let opts = create_output_options(Format::Json, true, false);
/// assert!(!opts.colored);
/// ```
pub fn create_output_options(format: Format, no_color: bool, verbose: bool) -> OutputOptions {
    OutputOptions {
        format: convert_format(format),
        colored: !no_color,
        verbose
    }
}

/// Allowed tables for a request: the CLI list when given, otherwise the
/// configured whitelist.
pub fn effective_allowed(cli: &[String], config: &Config) -> Vec<String> {
    let source = if cli.is_empty() {
        &config.whitelist.allowed_tables
    } else {
        cli
    };
    source
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Blocked schemas for an offline check.
///
/// A backend dialect gets that backend's catalogs; the generic dialect
/// blocks the catalogs of every supported backend.
pub fn lint_blocked_schemas(dialect: SqlDialect, configured: &[String]) -> Vec<String> {
    let backends: &[BackendKind] = match dialect {
        SqlDialect::PostgreSQL => &[BackendKind::Postgres],
        SqlDialect::MySQL => &[BackendKind::MySql],
        SqlDialect::Snowflake => &[BackendKind::Snowflake],
        SqlDialect::Generic => &[
            BackendKind::Postgres,
            BackendKind::MySql,
            BackendKind::Snowflake
        ]
    };
    let mut out: Vec<String> = Vec::new();
    for backend in backends {
        for schema in blocked_schemas(*backend, configured) {
            if !out.contains(&schema) {
                out.push(schema);
            }
        }
    }
    out
}

/// Classify every statement in `sql` and check it against the whitelist,
/// without touching a database.
///
/// # Example
///
/// ```
/// use sql_approval_gate::{app::lint_statements, query::SqlDialect};
///
/// let entries = lint_statements(
///     "SELECT * FROM items; DELETE FROM items",
///     SqlDialect::Generic,
///     &["items".to_string()],
///     &[]
/// );
/// assert!(entries[0].passed());
/// assert_eq!(entries[1].reason.as_deref(), Some("forbidden_keyword:DELETE"));
/// ```
pub fn lint_statements(
    sql: &str,
    dialect: SqlDialect,
    allowed: &[String],
    blocked: &[String]
) -> Vec<LintEntry> {
    let raw = split_statements(sql);
    parse_batch(sql, dialect)
        .into_iter()
        .zip(raw)
        .enumerate()
        .map(|(index, (outcome, raw))| match outcome {
            Ok(statement) => {
                let reason = enforce(&statement, allowed, blocked)
                    .err()
                    .map(|e| e.to_string());
                LintEntry {
                    index,
                    tables: statement.table_names(),
                    sql: statement.sql,
                    reason
                }
            }
            Err(e) => LintEntry {
                index,
                sql: raw,
                tables: Vec::new(),
                reason: Some(e.to_string())
            }
        })
        .collect()
}

/// Exit code for a lint run: 2 when any statement was rejected.
pub fn lint_exit_code(entries: &[LintEntry]) -> i32 {
    if entries.iter().all(LintEntry::passed) { 0 } else { 2 }
}

/// Build the gate described by `config`.
///
/// # Errors
///
/// Missing DSN, connection failures, an unreachable ingestion log, or an
/// audit store that cannot be opened.
pub async fn connect_gate(config: &Config) -> AppResult<AppGate> {
    let connector = connect_backend(config).await?;
    let provenance: Box<dyn ProvenanceSource> = match &config.connection.provenance_dsn {
        Some(dsn) => Box::new(PgIngestionLog::connect(dsn).await?),
        None => Box::new(NoProvenance)
    };
    let audit = Arc::new(AuditStore::open(&config.audit.path)?);
    Ok(Gate::new(connector, provenance, audit).with_config(config))
}

/// Connect to the configured backend only.
pub async fn connect_backend(config: &Config) -> AppResult<AnyConnector> {
    let dsn = config
        .connection
        .dsn
        .as_deref()
        .ok_or_else(|| config_error("no connection string (use --dsn or SQL_GATE_DSN)"))?;
    let connector = AnyConnector::connect(dsn, config.connection.token.as_deref())
        .await
        .map_err(GateError::from)?;
    Ok(connector)
}

/// Spinner on stderr for slow backend calls; text output only.
pub fn spinner(message: &str, opts: &OutputOptions) -> Option<ProgressBar> {
    if opts.format != OutputFormat::Text {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_allowed_prefers_cli() {
        let mut config = Config::default();
        config.whitelist.allowed_tables = vec!["orders".into()];
        assert_eq!(effective_allowed(&["items".into()], &config), vec!["items"]);
        assert_eq!(effective_allowed(&[], &config), vec!["orders"]);
    }

    #[test]
    fn test_generic_lint_blocks_all_catalogs() {
        let blocked = lint_blocked_schemas(SqlDialect::Generic, &["staging".into()]);
        for schema in ["pg_catalog", "information_schema", "pg_toast", "mysql", "staging"] {
            assert!(blocked.contains(&schema.to_string()), "{}", schema);
        }
    }

    #[test]
    fn test_lint_exit_code() {
        let entries = lint_statements("SELECT 1; DROP TABLE x", SqlDialect::Generic, &[], &[]);
        assert_eq!(entries.len(), 2);
        assert_eq!(lint_exit_code(&entries), 2);
        assert_eq!(lint_exit_code(&entries[..1]), 0);
    }
}
