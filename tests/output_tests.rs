// SPDX-FileCopyrightText: 2025 RAprogramm
// SPDX-License-Identifier: MIT

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::json;
use sql_approval_gate::{
    app::{LintEntry, PingReport},
    audit::{AuditEvent, RejectedAttempt},
    config::Thresholds,
    connector::{BackendKind, ColumnCard, ConnectionInfo, ReadOnlyLevel, ResultSet, TableCard},
    gate::{Approval, Review},
    output::{
        OutputFormat, OutputOptions, format_approval, format_events, format_lint, format_ping,
        format_rejection, format_review, format_schema
    },
    plan::PlanAnalysis,
    query::{SqlDialect, classify},
    risk::{RiskLevel, assess}
};

fn plain() -> OutputOptions {
    OutputOptions {
        format:  OutputFormat::Text,
        colored: false,
        verbose: false
    }
}

fn with_format(format: OutputFormat) -> OutputOptions {
    OutputOptions {
        format,
        ..plain()
    }
}

fn review(sql: &str, cost: f64) -> Review {
    let metrics = PlanAnalysis {
        total_cost: Some(cost),
        est_rows: Some(2.0),
        plan_width: Some(36.0),
        select_star: sql.contains('*'),
        ..Default::default()
    };
    Review {
        statement: classify(sql, SqlDialect::Generic).unwrap(),
        verdict:   assess(&metrics, &Thresholds::default())
    }
}

fn event() -> AuditEvent {
    AuditEvent {
        id:           7,
        created_at:   Utc::now(),
        question:     Some("which items?".to_string()),
        sql:          "SELECT id FROM items".to_string(),
        safe:         true,
        level:        RiskLevel::Ok,
        reasons:      Vec::new(),
        row_count:    1,
        truncated:    true,
        preview_hash: "0".repeat(64),
        provenance:   Vec::new(),
        attempts:     vec![RejectedAttempt {
            sql:    "SELECT * FROM nope".to_string(),
            reason: "unknown_table:nope".to_string()
        }]
    }
}

#[test]
fn test_output_options_default() {
    let opts = OutputOptions::default();
    assert!(matches!(opts.format, OutputFormat::Text));
    assert!(opts.colored);
    assert!(!opts.verbose);
}

#[test]
fn test_format_lint_text() {
    let entries = vec![
        LintEntry {
            index:  0,
            sql:    "SELECT * FROM items".to_string(),
            tables: vec!["items".to_string()],
            reason: None
        },
        LintEntry {
            index:  1,
            sql:    "DROP TABLE items".to_string(),
            tables: Vec::new(),
            reason: Some("forbidden_keyword:DROP".to_string())
        }
    ];
    let out = format_lint(&entries, &plain());
    assert!(out.contains("Statement #1:"));
    assert!(out.contains("Tables: items"));
    assert!(out.contains("rejected: forbidden_keyword:DROP"));
    assert!(out.contains("2 statement(s), 1 rejected"));
}

#[test]
fn test_format_lint_json() {
    let entries = vec![LintEntry {
        index:  0,
        sql:    "SELECT 1".to_string(),
        tables: Vec::new(),
        reason: None
    }];
    let out = format_lint(&entries, &with_format(OutputFormat::Json));
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed[0]["sql"], "SELECT 1");
    assert!(parsed[0]["reason"].is_null());
}

#[test]
fn test_format_review_text() {
    let out = format_review(&review("SELECT * FROM items LIMIT 2", 12.5), &plain());
    assert!(out.contains("SELECT * FROM items LIMIT 2"));
    assert!(out.contains("Verdict: WARN"));
    assert!(out.contains("total_cost=12.5"));
    assert!(out.contains("select_star"));
}

#[test]
fn test_format_review_json_block() {
    let out = format_review(
        &review("SELECT id FROM items", 2_000_000.0),
        &with_format(OutputFormat::Json)
    );
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed["verdict"]["level"], "block");
    assert_eq!(
        parsed["verdict"]["reasons"][0],
        "total_cost 2000000 > 1000000"
    );
}

#[test]
fn test_format_review_verbose_thresholds() {
    let opts = OutputOptions {
        verbose: true,
        ..plain()
    };
    let out = format_review(&review("SELECT id FROM items", 1.0), &opts);
    assert!(out.contains("Thresholds: max_total_cost=1000000"));
}

#[test]
fn test_format_rejection_text() {
    let out = format_rejection(&["unknown_table:nope".to_string()], &plain());
    assert!(out.contains("Verdict: BLOCK"));
    assert!(out.contains("  - unknown_table:nope"));
}

#[test]
fn test_format_rejection_yaml() {
    let out = format_rejection(&["blocked_schema".to_string()], &with_format(OutputFormat::Yaml));
    assert!(out.contains("level: block"));
    assert!(out.contains("blocked_schema"));
}

#[test]
fn test_format_approval_rows() {
    let approval = Approval {
        event:   event(),
        verdict: review("SELECT id FROM items", 1.0).verdict,
        result:  ResultSet {
            columns:   vec!["id".to_string()],
            rows:      vec![vec![json!(1)], vec![json!(null)]],
            truncated: true
        }
    };
    let out = format_approval(&approval, true, &plain());
    assert!(out.contains("Event #7"));
    assert!(out.contains("(truncated)"));
    assert!(out.contains("Rejected attempt: SELECT * FROM nope (unknown_table:nope)"));
    assert!(out.contains("NULL"));

    let json_out = format_approval(&approval, false, &with_format(OutputFormat::Json));
    let parsed: serde_json::Value = serde_json::from_str(&json_out).unwrap();
    assert_eq!(parsed["event"]["id"], 7);
    assert!(parsed.get("rows").is_none());
}

#[test]
fn test_format_events_empty() {
    assert_eq!(format_events(&[], &plain()), "No audit events\n");
}

#[test]
fn test_format_ping() {
    let report = PingReport {
        backend:   BackendKind::MySql,
        info:      ConnectionInfo {
            ok:                     true,
            version:                "8.0.36".to_string(),
            supports_cost_estimate: false
        },
        read_only: ReadOnlyLevel::SafeUpdates
    };
    let out = format_ping(&report, &plain());
    assert!(out.contains("Backend: mysql"));
    assert!(out.contains("Read-only: safe_updates"));
    assert!(out.contains("Cost estimates: no"));
}

#[test]
fn test_format_schema_samples_when_verbose() {
    let mut samples = IndexMap::new();
    samples.insert("id".to_string(), vec![json!(1), json!(2)]);
    let cards = vec![TableCard {
        schema: "public".to_string(),
        table: "items".to_string(),
        columns: vec![ColumnCard {
            name:      "id".to_string(),
            data_type: "integer".to_string()
        }],
        samples
    }];

    let out = format_schema(&cards, &plain());
    assert!(out.contains("public.items"));
    assert!(out.contains("  id integer"));
    assert!(!out.contains("[1, 2]"));

    let verbose = OutputOptions {
        verbose: true,
        ..plain()
    };
    assert!(format_schema(&cards, &verbose).contains("[1, 2]"));
}
