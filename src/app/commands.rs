//! Command handlers.
//!
//! Each handler renders its result instead of printing it, so the exit code
//! and output can be checked in tests.

use tracing::info;

use super::{
    convert::convert_dialect,
    helpers::{
        connect_backend, connect_gate, effective_allowed, lint_blocked_schemas, lint_exit_code,
        lint_statements, read_sql_input, spinner
    },
    types::{CommandOutput, PingReport}
};
use crate::{
    audit::AuditStore,
    cli::{Dialect, HistoryAction, SqlInput},
    config::Config,
    connector::Connector,
    error::{AppResult, GateError, audit_error},
    gate::ApprovalRequest,
    output::{
        OutputOptions, format_approval, format_events, format_lint, format_ping,
        format_rejection, format_review, format_schema
    },
    query::split_statements
};

/// Reasons for a request the gate refused before running anything.
///
/// Returns `None` for operational failures, which surface as errors.
pub fn rejection_reasons(err: &GateError) -> Option<Vec<String>> {
    match err {
        GateError::Classification(e) => Some(vec![e.to_string()]),
        GateError::Whitelist(e) => Some(vec![e.to_string()]),
        GateError::Blocked {
            reasons
        } => Some(reasons.clone()),
        _ => None
    }
}

fn refused(err: GateError, opts: &OutputOptions) -> AppResult<CommandOutput> {
    match rejection_reasons(&err) {
        Some(reasons) => {
            info!(reasons = ?reasons, "request refused");
            Ok(CommandOutput::new(2, format_rejection(&reasons, opts)))
        }
        None => Err(err.into())
    }
}

/// Offline classification and whitelist check of every statement.
pub fn run_lint(
    input: &SqlInput,
    allow: &[String],
    dialect: Dialect,
    config: &Config,
    opts: &OutputOptions
) -> AppResult<CommandOutput> {
    let sql = read_sql_input(input)?;
    let dialect = convert_dialect(dialect);
    let allowed = effective_allowed(allow, config);
    let blocked = lint_blocked_schemas(dialect, &config.whitelist.blocked_schemas);
    let entries = lint_statements(&sql, dialect, &allowed, &blocked);
    Ok(CommandOutput::new(
        lint_exit_code(&entries),
        format_lint(&entries, opts)
    ))
}

/// Review one statement against its plan without executing it.
pub async fn run_validate(
    input: &SqlInput,
    allow: &[String],
    config: &Config,
    opts: &OutputOptions
) -> AppResult<CommandOutput> {
    let sql = read_sql_input(input)?;
    let allowed = effective_allowed(allow, config);
    let gate = connect_gate(config).await?;

    let pb = spinner("Fetching plan...", opts);
    let outcome = gate.review(&sql, &allowed).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    match outcome {
        Ok(review) => Ok(CommandOutput::new(
            review.verdict.level.exit_code(),
            format_review(&review, opts)
        )),
        Err(e) => refused(e, opts)
    }
}

/// Options of the approve command beyond the SQL input.
#[derive(Debug, Clone, Default)]
pub struct ApproveParams {
    pub allow:        Vec<String>,
    pub question:     Option<String>,
    pub max_rows:     Option<usize>,
    pub preview_rows: Option<usize>,
    pub show_rows:    bool
}

/// Review, execute bounded and audit.
///
/// Input holding several statements is treated as ranked candidates: the
/// first acceptable one runs and the others are recorded as attempts.
pub async fn run_approve(
    input: &SqlInput,
    params: ApproveParams,
    config: &Config,
    opts: &OutputOptions
) -> AppResult<CommandOutput> {
    let sql = read_sql_input(input)?;
    let allowed = effective_allowed(&params.allow, config);
    let gate = connect_gate(config).await?;
    let candidates = split_statements(&sql);

    let pb = spinner("Running bounded query...", opts);
    let outcome = if candidates.len() > 1 {
        gate.approve_first(&candidates, &allowed, params.question)
            .await
    } else {
        gate.approve_and_execute(ApprovalRequest {
            sql,
            question: params.question,
            allowed_tables: allowed,
            row_cap: params.max_rows,
            preview_rows: params.preview_rows,
            attempts: Vec::new()
        })
        .await
    };
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    match outcome {
        Ok(approval) => Ok(CommandOutput::new(
            approval.verdict.level.exit_code(),
            format_approval(&approval, params.show_rows, opts)
        )),
        Err(e) => refused(e, opts)
    }
}

/// Read the audit log. Needs no database connection.
pub fn run_history(
    action: &HistoryAction,
    config: &Config,
    opts: &OutputOptions
) -> AppResult<CommandOutput> {
    let store = AuditStore::open(&config.audit.path)?;
    match action {
        HistoryAction::Recent {
            limit
        } => {
            let events = store.recent(*limit)?;
            Ok(CommandOutput::new(0, format_events(&events, opts)))
        }
        HistoryAction::Show {
            id
        } => {
            let event = store
                .by_id(*id)?
                .ok_or_else(|| audit_error(format!("no audit event with id {}", id)))?;
            Ok(CommandOutput::new(0, format_events(&[event], opts)))
        }
    }
}

/// Probe the backend and the read-only guarantee it accepts.
pub async fn run_ping(config: &Config, opts: &OutputOptions) -> AppResult<CommandOutput> {
    let connector = connect_backend(config).await?;
    let info = connector
        .test_connection()
        .await
        .map_err(GateError::from)?;
    let read_only = connector
        .enforce_session_readonly()
        .await
        .map_err(GateError::from)?;
    let report = PingReport {
        backend: connector.backend(),
        info,
        read_only
    };
    Ok(CommandOutput::new(0, format_ping(&report, opts)))
}

/// List tables with columns and sample values.
pub async fn run_schema(
    samples: Option<usize>,
    config: &Config,
    opts: &OutputOptions
) -> AppResult<CommandOutput> {
    let connector = connect_backend(config).await?;
    let limit = samples.unwrap_or(config.execution.sample_limit);

    let pb = spinner("Introspecting schema...", opts);
    let cards = connector.introspect_schema(limit).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let cards = cards.map_err(GateError::from)?;
    Ok(CommandOutput::new(0, format_schema(&cards, opts)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClassificationError, ConnectorError, WhitelistRejection};

    #[test]
    fn test_rejection_reasons() {
        let err = GateError::from(WhitelistRejection::UnknownTable {
            table: "nope".into()
        });
        assert_eq!(
            rejection_reasons(&err),
            Some(vec!["unknown_table:nope".to_string()])
        );

        let err = GateError::from(ClassificationError::MultiStatement {
            count: 2
        });
        assert_eq!(
            rejection_reasons(&err),
            Some(vec!["multi_statement:2".to_string()])
        );

        let err = GateError::from(ConnectorError::unreachable("refused"));
        assert!(rejection_reasons(&err).is_none());
    }
}
