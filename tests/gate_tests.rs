use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering}
    },
    time::Duration
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use sql_approval_gate::{
    audit::AuditStore,
    config::ExecutionConfig,
    connector::{
        BackendKind, ConnectionInfo, Connector, ConnectorResult, ReadOnlyLevel, ResultSet,
        TableCard
    },
    error::{ConnectorError, ExecutionError, GateError, WhitelistRejection},
    gate::{ApprovalRequest, Gate, preview_hash},
    plan::NativePlan,
    provenance::{MemoryProvenance, NoProvenance, TableProvenance},
    risk::RiskLevel
};

struct FakeConnector {
    backend:    BackendKind,
    plan:       ConnectorResult<NativePlan>,
    rows:       Vec<Vec<Value>>,
    delay:      Option<Duration>,
    failure:    Option<ConnectorError>,
    executions: Arc<AtomicUsize>
}

impl FakeConnector {
    fn new(plan: NativePlan) -> Self {
        Self {
            backend:    BackendKind::Postgres,
            plan:       Ok(plan),
            rows:       vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]],
            delay:      None,
            failure:    None,
            executions: Arc::new(AtomicUsize::new(0))
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    async fn test_connection(&self) -> ConnectorResult<ConnectionInfo> {
        Ok(ConnectionInfo {
            ok:                     true,
            version:                "fake 1.0".to_string(),
            supports_cost_estimate: true
        })
    }

    async fn introspect_schema(&self, _sample_limit: usize) -> ConnectorResult<Vec<TableCard>> {
        Ok(Vec::new())
    }

    async fn enforce_session_readonly(&self) -> ConnectorResult<ReadOnlyLevel> {
        Ok(ReadOnlyLevel::Session)
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier)
    }

    async fn explain(&self, _sql: &str) -> ConnectorResult<NativePlan> {
        self.plan.clone()
    }

    async fn execute_readonly(
        &self,
        _sql: &str,
        row_cap: usize,
        _time_budget: Duration
    ) -> ConnectorResult<ResultSet> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(ResultSet::capped(
            vec!["id".to_string(), "name".to_string()],
            self.rows.clone(),
            row_cap
        ))
    }
}

fn pg_plan(cost: f64, rows: f64) -> NativePlan {
    NativePlan::JsonTree(json!([{
        "Plan": {
            "Node Type": "Limit",
            "Total Cost": cost,
            "Plan Rows": rows,
            "Plan Width": 36
        }
    }]))
}

fn cheap() -> NativePlan {
    pg_plan(12.5, 2.0)
}

fn store() -> Arc<AuditStore> {
    Arc::new(AuditStore::open_memory().unwrap())
}

fn items_provenance() -> MemoryProvenance {
    let mut source = MemoryProvenance::new();
    source.record(TableProvenance {
        table:        "public.items".to_string(),
        source_url:   Some("https://data.example.org/items.csv".to_string()),
        content_hash: Some("ef".repeat(32)),
        row_count:    Some(2),
        byte_size:    Some(64),
        ingested_at:  Utc.timestamp_opt(1_700_000_000, 0).single()
    });
    source
}

#[tokio::test]
async fn test_review_ok_and_warn() {
    let gate = Gate::new(FakeConnector::new(cheap()), NoProvenance, store());

    let review = gate
        .review("SELECT id, name FROM items LIMIT 2", &["items"])
        .await
        .unwrap();
    assert_eq!(review.verdict.level, RiskLevel::Ok);
    assert_eq!(review.verdict.metrics.total_cost, Some(12.5));

    let review = gate
        .review("SELECT * FROM items LIMIT 2;", &["items"])
        .await
        .unwrap();
    assert_eq!(review.statement.sql, "SELECT * FROM items LIMIT 2");
    assert_eq!(review.verdict.level, RiskLevel::Warn);
}

#[tokio::test]
async fn test_review_rejects_before_explain() {
    let gate = Gate::new(FakeConnector::new(cheap()), NoProvenance, store());

    let err = gate.review("SELECT * FROM nope", &["items"]).await.unwrap_err();
    assert!(matches!(
        err,
        GateError::Whitelist(WhitelistRejection::UnknownTable { ref table }) if table == "nope"
    ));

    let err = gate
        .review("SELECT * FROM pg_catalog.pg_class", &[] as &[&str])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GateError::Whitelist(WhitelistRejection::BlockedSchema { .. })
    ));

    let err = gate.review("DROP TABLE items", &["items"]).await.unwrap_err();
    assert_eq!(err.to_string(), "forbidden_keyword:DROP");
}

#[tokio::test]
async fn test_approve_writes_one_event() {
    let audit = store();
    let gate = Gate::new(FakeConnector::new(cheap()), items_provenance(), audit.clone());
    let before = audit.max_id().unwrap();

    let approval = gate
        .approve_and_execute(
            ApprovalRequest::new("SELECT id, name FROM items LIMIT 2")
                .allow(["items"])
                .question("which items?")
        )
        .await
        .unwrap();

    assert_eq!(approval.event.id, before + 1);
    assert_eq!(audit.max_id().unwrap(), before + 1);
    assert_eq!(approval.event.row_count, 2);
    assert!(!approval.event.truncated);
    assert!(approval.event.safe);
    assert_eq!(approval.event.question.as_deref(), Some("which items?"));
    assert_eq!(
        approval.event.preview_hash,
        preview_hash(&approval.result.rows, 50).unwrap()
    );
    assert_eq!(approval.event.provenance.len(), 1);
    assert_eq!(approval.event.provenance[0].table, "public.items");

    let stored = audit.by_id(approval.event.id).unwrap().unwrap();
    assert_eq!(stored.preview_hash, approval.event.preview_hash);
}

#[tokio::test]
async fn test_approve_marks_truncation() {
    let mut connector = FakeConnector::new(cheap());
    connector.rows = (0..5).map(|n| vec![json!(n), json!("x")]).collect();
    let gate = Gate::new(connector, NoProvenance, store());

    let approval = gate
        .approve_and_execute(ApprovalRequest::new("SELECT id, name FROM items").row_cap(3))
        .await
        .unwrap();
    assert_eq!(approval.result.row_count(), 3);
    assert!(approval.event.truncated);
    assert_eq!(approval.event.row_count, 3);
}

#[tokio::test]
async fn test_empty_result_keeps_columns() {
    let mut connector = FakeConnector::new(cheap());
    connector.rows = Vec::new();
    let gate = Gate::new(connector, NoProvenance, store());

    let approval = gate
        .approve_and_execute(ApprovalRequest::new("SELECT id, name FROM items WHERE false"))
        .await
        .unwrap();
    assert_eq!(approval.result.columns, vec!["id", "name"]);
    assert_eq!(approval.event.row_count, 0);
    assert!(!approval.event.truncated);
}

#[tokio::test]
async fn test_maximal_row_cap_request() {
    let gate = Gate::new(FakeConnector::new(cheap()), NoProvenance, store());

    let request = ApprovalRequest::new("SELECT id, name FROM items").row_cap(usize::MAX);
    let approval = gate.approve_and_execute(request).await.unwrap();
    assert_eq!(approval.result.row_count(), 2);
    assert!(!approval.event.truncated);
}

#[tokio::test]
async fn test_blocked_plan_never_executes() {
    let connector = FakeConnector::new(pg_plan(2_000_000.0, 10.0));
    let executions = connector.executions.clone();
    let audit = store();
    let gate = Gate::new(connector, NoProvenance, audit.clone());

    let err = gate
        .approve_and_execute(ApprovalRequest::new("SELECT id FROM items"))
        .await
        .unwrap_err();
    match err {
        GateError::Blocked {
            reasons
        } => assert_eq!(reasons, vec!["total_cost 2000000 > 1000000"]),
        other => panic!("unexpected error: {other}")
    }
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    assert_eq!(audit.max_id().unwrap(), 0);
}

#[tokio::test]
async fn test_time_budget_exceeded_writes_nothing() {
    let mut connector = FakeConnector::new(cheap());
    connector.delay = Some(Duration::from_millis(500));
    let audit = store();
    let gate = Gate::new(connector, NoProvenance, audit.clone()).with_execution(ExecutionConfig {
        time_budget_ms: 20,
        ..ExecutionConfig::default()
    });

    let err = gate
        .approve_and_execute(ApprovalRequest::new("SELECT id FROM items"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GateError::Execution(ExecutionError::TimeoutExceeded { budget_ms: 20 })
    ));
    assert_eq!(audit.max_id().unwrap(), 0);
}

#[tokio::test]
async fn test_backend_timeout_maps_to_budget_error() {
    let mut connector = FakeConnector::new(cheap());
    connector.failure = Some(ConnectorError::Timeout {
        timeout_ms: 15_000
    });
    let audit = store();
    let gate = Gate::new(connector, NoProvenance, audit.clone());

    let err = gate
        .approve_and_execute(ApprovalRequest::new("SELECT id FROM items"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "timeout_exceeded:15000ms");
    assert_eq!(audit.max_id().unwrap(), 0);
}

#[tokio::test]
async fn test_backend_failure_is_execution_error() {
    let mut connector = FakeConnector::new(cheap());
    connector.failure = Some(ConnectorError::unreachable("connection reset"));
    let gate = Gate::new(connector, NoProvenance, store());

    let err = gate
        .approve_and_execute(ApprovalRequest::new("SELECT id FROM items"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GateError::Execution(ExecutionError::Connector(ConnectorError::Unreachable { .. }))
    ));
}

#[tokio::test]
async fn test_text_plan_backend_without_explain() {
    let mut connector = FakeConnector::new(cheap());
    connector.backend = BackendKind::Snowflake;
    connector.plan = Err(ConnectorError::unsupported("no plan"));
    let gate = Gate::new(connector, NoProvenance, store());

    let review = gate
        .review("SELECT id FROM items", &["items"])
        .await
        .unwrap();
    assert_eq!(review.verdict.level, RiskLevel::Ok);
    assert_eq!(review.verdict.metrics.total_cost, None);
}

#[tokio::test]
async fn test_screen_candidates_picks_first_acceptable() {
    let gate = Gate::new(FakeConnector::new(cheap()), NoProvenance, store());
    let candidates = vec![
        "DELETE FROM items".to_string(),
        "SELECT * FROM nope".to_string(),
        "SELECT id FROM items".to_string(),
        "SELECT name FROM items".to_string()
    ];

    let screening = gate
        .screen_candidates(&candidates, &["items"])
        .await
        .unwrap();
    let (index, review) = screening.selected.unwrap();
    assert_eq!(index, 2);
    assert_eq!(review.statement.sql, "SELECT id FROM items");
    assert_eq!(screening.attempts.len(), 2);
    assert_eq!(screening.attempts[0].reason, "forbidden_keyword:DELETE");
    assert_eq!(screening.attempts[1].reason, "unknown_table:nope");
}

#[tokio::test]
async fn test_approve_first_records_attempts() {
    let audit = store();
    let gate = Gate::new(FakeConnector::new(cheap()), NoProvenance, audit.clone());
    let candidates = vec![
        "SELECT * FROM nope".to_string(),
        "SELECT id FROM items".to_string()
    ];

    let approval = gate
        .approve_first(&candidates, &["items"], Some("ids".to_string()))
        .await
        .unwrap();
    assert_eq!(approval.event.sql, "SELECT id FROM items");
    assert_eq!(approval.event.attempts.len(), 1);
    assert_eq!(approval.event.attempts[0].sql, "SELECT * FROM nope");
    assert_eq!(audit.max_id().unwrap(), 1);
}

#[tokio::test]
async fn test_approve_first_all_rejected() {
    let audit = store();
    let gate = Gate::new(FakeConnector::new(cheap()), NoProvenance, audit.clone());
    let candidates = vec![
        "UPDATE items SET name = 'x'".to_string(),
        "SELECT * FROM nope".to_string()
    ];

    let err = gate
        .approve_first(&candidates, &["items"], None)
        .await
        .unwrap_err();
    match err {
        GateError::Blocked {
            reasons
        } => assert_eq!(
            reasons,
            vec!["forbidden_keyword:UPDATE", "unknown_table:nope"]
        ),
        other => panic!("unexpected error: {other}")
    }
    assert_eq!(audit.max_id().unwrap(), 0);
}

#[test]
fn test_preview_hash_depends_on_prefix_only() {
    let rows = vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]];
    let two = preview_hash(&rows, 2).unwrap();
    assert_eq!(two, preview_hash(&rows[..2], 10).unwrap());
    assert_ne!(two, preview_hash(&rows, 3).unwrap());
    assert_eq!(preview_hash(&[], 5).unwrap().len(), 64);
}
