use colored::Colorize;
use serde::Serialize;

use crate::{
    app::{LintEntry, PingReport},
    audit::AuditEvent,
    connector::TableCard,
    gate::{Approval, Review},
    plan::PlanAnalysis,
    risk::{RiskLevel, SafetyVerdict}
};

/// Output format for results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml
}

/// Output options
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format:  OutputFormat,
    pub colored: bool,
    pub verbose: bool
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format:  OutputFormat::Text,
            colored: true,
            verbose: false
        }
    }
}

/// Serialize for JSON/YAML, or build the text form lazily
fn render<T: Serialize>(value: &T, opts: &OutputOptions, text: impl FnOnce() -> String) -> String {
    match opts.format {
        OutputFormat::Json => serde_json::to_string_pretty(value).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(value).unwrap_or_default(),
        OutputFormat::Text => text()
    }
}

fn paint(text: &str, opts: &OutputOptions, style: fn(&str) -> colored::ColoredString) -> String {
    if opts.colored {
        style(text).to_string()
    } else {
        text.to_string()
    }
}

fn level_label(level: RiskLevel, opts: &OutputOptions) -> String {
    let label = level.to_string().to_uppercase();
    match level {
        RiskLevel::Ok => paint(&label, opts, |s| s.green().bold()),
        RiskLevel::Warn => paint(&label, opts, |s| s.yellow().bold()),
        RiskLevel::Block => paint(&label, opts, |s| s.red().bold())
    }
}

fn metric(value: Option<f64>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

fn format_metrics(metrics: &PlanAnalysis) -> String {
    let mut line = format!(
        "total_cost={} est_rows={} plan_width={}",
        metric(metrics.total_cost),
        metric(metrics.est_rows),
        metric(metrics.plan_width)
    );
    if metrics.select_star {
        line.push_str(" select_star");
    }
    if metrics.has_seqscan {
        line.push_str(" full_scan");
    }
    line
}

fn format_verdict_text(verdict: &SafetyVerdict, opts: &OutputOptions) -> String {
    let mut out = format!("Verdict: {}\n", level_label(verdict.level, opts));
    for reason in &verdict.reasons {
        out.push_str(&format!("  - {}\n", reason));
    }
    out.push_str(&format!("Metrics: {}\n", format_metrics(&verdict.metrics)));
    if opts.verbose {
        let t = &verdict.thresholds;
        out.push_str(&format!(
            "Thresholds: max_total_cost={} max_est_rows={} max_width={} forbid_cartesian={}\n",
            t.max_total_cost, t.max_est_rows, t.max_width, t.forbid_cartesian
        ));
    }
    out
}

/// Format offline lint results
pub fn format_lint(entries: &[LintEntry], opts: &OutputOptions) -> String {
    render(&entries, opts, || {
        let mut out = String::new();
        for entry in entries {
            let header = format!("Statement #{}:", entry.index + 1);
            out.push_str(&paint(&header, opts, |s| s.cyan().bold()));
            out.push('\n');
            out.push_str(&format!("{}\n", entry.sql));
            if !entry.tables.is_empty() {
                out.push_str(&format!("Tables: {}\n", entry.tables.join(", ")));
            }
            match &entry.reason {
                None => out.push_str(&format!("{}\n", paint("passed", opts, |s| s.green()))),
                Some(reason) => {
                    out.push_str(&format!("{} {}\n", paint("rejected:", opts, |s| s.red()), reason))
                }
            }
            out.push('\n');
        }
        let rejected = entries.iter().filter(|e| e.reason.is_some()).count();
        out.push_str(&format!(
            "{} statement(s), {} rejected\n",
            entries.len(),
            rejected
        ));
        out
    })
}

/// Format the review of one statement
pub fn format_review(review: &Review, opts: &OutputOptions) -> String {
    render(review, opts, || {
        let mut out = format!("{}\n", review.statement.sql);
        let tables: Vec<String> = review
            .statement
            .tables
            .iter()
            .map(|t| t.qualified())
            .collect();
        out.push_str(&format!("Tables: {}\n", tables.join(", ")));
        out.push_str(&format_verdict_text(&review.verdict, opts));
        out
    })
}

#[derive(Serialize)]
struct Rejection<'a> {
    level:   RiskLevel,
    reasons: &'a [String]
}

/// Format a rejection that stopped a request before any verdict
pub fn format_rejection(reasons: &[String], opts: &OutputOptions) -> String {
    let value = Rejection {
        level: RiskLevel::Block,
        reasons
    };
    render(&value, opts, || {
        let mut out = format!("Verdict: {}\n", level_label(RiskLevel::Block, opts));
        for reason in reasons {
            out.push_str(&format!("  - {}\n", reason));
        }
        out
    })
}

#[derive(Serialize)]
struct ApprovalView<'a> {
    event:   &'a AuditEvent,
    verdict: &'a SafetyVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    columns: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows:    Option<&'a [Vec<serde_json::Value>]>
}

/// Format an approved execution, optionally with its rows
pub fn format_approval(approval: &Approval, show_rows: bool, opts: &OutputOptions) -> String {
    let view = ApprovalView {
        event:   &approval.event,
        verdict: &approval.verdict,
        columns: show_rows.then_some(approval.result.columns.as_slice()),
        rows:    show_rows.then_some(approval.result.rows.as_slice())
    };
    render(&view, opts, || {
        let mut out = format_event_text(&approval.event, opts);
        out.push_str(&format_verdict_text(&approval.verdict, opts));
        if show_rows {
            out.push('\n');
            out.push_str(&approval.result.columns.join(" | "));
            out.push('\n');
            for row in &approval.result.rows {
                let cells: Vec<String> = row.iter().map(cell_text).collect();
                out.push_str(&cells.join(" | "));
                out.push('\n');
            }
        }
        out
    })
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "NULL".to_string(),
        other => other.to_string()
    }
}

fn format_event_text(event: &AuditEvent, opts: &OutputOptions) -> String {
    let header = format!("Event #{} at {}", event.id, event.created_at.to_rfc3339());
    let mut out = paint(&header, opts, |s| s.cyan().bold());
    out.push('\n');
    if let Some(question) = &event.question {
        out.push_str(&format!("Question: {}\n", question));
    }
    out.push_str(&format!("SQL: {}\n", event.sql));
    out.push_str(&format!(
        "Level: {}  Rows: {}{}\n",
        level_label(event.level, opts),
        event.row_count,
        if event.truncated { " (truncated)" } else { "" }
    ));
    out.push_str(&format!("Preview hash: {}\n", event.preview_hash));
    for p in &event.provenance {
        out.push_str(&format!(
            "Provenance: {} <- {} ({})\n",
            p.table,
            p.source_url.as_deref().unwrap_or("unknown source"),
            p.ingested_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown time".to_string())
        ));
    }
    for attempt in &event.attempts {
        out.push_str(&format!(
            "Rejected attempt: {} ({})\n",
            attempt.sql, attempt.reason
        ));
    }
    out
}

/// Format audit events
pub fn format_events(events: &[AuditEvent], opts: &OutputOptions) -> String {
    render(&events, opts, || {
        if events.is_empty() {
            return "No audit events\n".to_string();
        }
        events
            .iter()
            .map(|e| format_event_text(e, opts))
            .collect::<Vec<_>>()
            .join("\n")
    })
}

/// Format a connectivity report
pub fn format_ping(report: &PingReport, opts: &OutputOptions) -> String {
    render(report, opts, || {
        format!(
            "Backend: {}\nVersion: {}\nRead-only: {}\nCost estimates: {}\n",
            report.backend,
            report.info.version,
            report.read_only,
            if report.info.supports_cost_estimate { "yes" } else { "no" }
        )
    })
}

/// Format introspected tables
pub fn format_schema(cards: &[TableCard], opts: &OutputOptions) -> String {
    render(&cards, opts, || {
        let mut out = String::new();
        for card in cards {
            out.push_str(&paint(&card.qualified(), opts, |s| s.cyan().bold()));
            out.push('\n');
            for column in &card.columns {
                let samples: Vec<String> = card
                    .samples
                    .get(&column.name)
                    .map(|values| values.iter().map(cell_text).collect())
                    .unwrap_or_default();
                out.push_str(&format!("  {} {}", column.name, column.data_type));
                if opts.verbose && !samples.is_empty() {
                    out.push_str(&format!("  [{}]", samples.join(", ")));
                }
                out.push('\n');
            }
        }
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_unknown() {
        assert_eq!(metric(None), "unknown");
        assert_eq!(metric(Some(2_000_000.0)), "2000000");
    }

    #[test]
    fn test_rejection_json() {
        let opts = OutputOptions {
            format: OutputFormat::Json,
            ..Default::default()
        };
        let out = format_rejection(&["unknown_table:nope".to_string()], &opts);
        assert!(out.contains("\"level\": \"block\""));
        assert!(out.contains("unknown_table:nope"));
    }
}
