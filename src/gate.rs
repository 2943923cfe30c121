//! Audited execution gate.
//!
//! Composes the pipeline for one request: classify, enforce the whitelist,
//! fetch and analyze the plan, assess risk, and on approval run the bounded
//! query, hash a preview of its rows, resolve provenance and append exactly
//! one audit event.
//!
//! Nothing is written to the audit log unless execution completed. A timeout,
//! a backend error or a dropped future leaves the log untouched.

mod types;

use std::sync::Arc;

use rayon::prelude::*;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::timeout;
use tracing::{info, warn};
pub use types::{Approval, ApprovalRequest, Review, Screening};

use crate::{
    audit::{AuditStore, NewAuditEvent, RejectedAttempt},
    config::{Config, ExecutionConfig, Thresholds},
    connector::Connector,
    error::{ConnectorError, ExecutionError, GateError, GateResult},
    plan::{self, PlanAnalysis},
    provenance::ProvenanceSource,
    query::{SqlStatement, classify},
    risk::RiskRunner,
    whitelist::{blocked_schemas, enforce}
};

/// Per-process gate over one connector.
///
/// Holds no per-request state; every call builds its own statement, plan
/// and verdict.
pub struct Gate<C, P> {
    connector:       C,
    provenance:      P,
    audit:           Arc<AuditStore>,
    thresholds:      Thresholds,
    execution:       ExecutionConfig,
    blocked_schemas: Vec<String>,
    default_schema:  Option<String>,
    runner:          RiskRunner
}

impl<C, P> Gate<C, P>
where
    C: Connector,
    P: ProvenanceSource
{
    /// Gate with default thresholds and execution bounds.
    pub fn new(connector: C, provenance: P, audit: Arc<AuditStore>) -> Self {
        let blocked_schemas = blocked_schemas(connector.backend(), &[]);
        Self {
            connector,
            provenance,
            audit,
            thresholds: Thresholds::default(),
            execution: ExecutionConfig::default(),
            blocked_schemas,
            default_schema: None,
            runner: RiskRunner::new()
        }
    }

    /// Take thresholds, execution bounds, blocked schemas and the default
    /// schema from a loaded config.
    pub fn with_config(self, config: &Config) -> Self {
        let blocked = blocked_schemas(
            self.connector.backend(),
            &config.whitelist.blocked_schemas
        );
        Self {
            thresholds: config.thresholds.clone(),
            execution: config.execution.clone(),
            blocked_schemas: blocked,
            default_schema: config.connection.default_schema.clone(),
            ..self
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn audit(&self) -> &AuditStore {
        &self.audit
    }

    /// Classify, enforce and assess `raw_sql` without executing it.
    ///
    /// # Errors
    ///
    /// Classification and whitelist rejections, plan shape errors, and any
    /// connector error except a missing structured plan on a backend that
    /// has none.
    pub async fn review<A: AsRef<str>>(&self, raw_sql: &str, allowed: &[A]) -> GateResult<Review> {
        let statement = classify(raw_sql, self.connector.backend().dialect())?;
        self.review_statement(statement, allowed).await
    }

    async fn review_statement<A: AsRef<str>>(
        &self,
        statement: SqlStatement,
        allowed: &[A]
    ) -> GateResult<Review> {
        enforce(&statement, allowed, &self.blocked_schemas)?;
        let analysis = self.analyze_plan(&statement).await?;
        let verdict = self.runner.assess(&analysis, &self.thresholds);
        Ok(Review {
            statement,
            verdict
        })
    }

    async fn analyze_plan(&self, statement: &SqlStatement) -> GateResult<PlanAnalysis> {
        let backend = self.connector.backend();
        match self.connector.explain(&statement.sql).await {
            Ok(native) => plan::analyze(&native, &statement.sql, backend),
            Err(
                e @ ConnectorError::Unsupported {
                    ..
                }
            ) if !backend.structured_plans() => {
                warn!(backend = %backend, error = %e, "no plan available, metrics unknown");
                Ok(plan::analyze_tree(None, &statement.sql, backend))
            }
            Err(e) => Err(e.into())
        }
    }

    /// Review, execute within bounds and record one audit event.
    ///
    /// # Errors
    ///
    /// [`GateError::Blocked`] for a blocking verdict, any review error,
    /// [`ExecutionError::TimeoutExceeded`] when the time budget runs out,
    /// and provenance or audit store failures. No event is written in any
    /// of these cases.
    pub async fn approve_and_execute(&self, request: ApprovalRequest) -> GateResult<Approval> {
        let review = self.review(&request.sql, &request.allowed_tables).await?;
        if review.verdict.is_blocked() {
            return Err(GateError::Blocked {
                reasons: review.verdict.reasons
            });
        }

        let row_cap = request.row_cap.unwrap_or(self.execution.row_cap);
        let preview_rows = request.preview_rows.unwrap_or(self.execution.preview_rows);
        let budget = self.execution.time_budget();
        let budget_ms = self.execution.time_budget_ms;

        let sql = &review.statement.sql;
        let result = match timeout(budget, self.connector.execute_readonly(sql, row_cap, budget)).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(ConnectorError::Timeout {
                ..
            }))
            | Err(_) => {
                warn!(budget_ms, "execution exceeded its time budget");
                return Err(ExecutionError::TimeoutExceeded {
                    budget_ms
                }
                .into());
            }
            Ok(Err(e)) => return Err(ExecutionError::Connector(e).into())
        };

        let preview_hash = preview_hash(&result.rows, preview_rows)?;
        let tables = self.provenance_keys(&review.statement);
        let provenance = self.provenance.latest_for(&tables).await?;

        let event = self.audit.append(NewAuditEvent {
            question: request.question,
            sql: review.statement.sql.clone(),
            safe: true,
            level: review.verdict.level,
            reasons: review.verdict.reasons.clone(),
            row_count: result.row_count(),
            truncated: result.truncated,
            preview_hash,
            provenance,
            attempts: request.attempts
        })?;
        info!(
            id = event.id,
            level = %event.level,
            rows = event.row_count,
            truncated = event.truncated,
            "statement approved and executed"
        );
        Ok(Approval {
            event,
            verdict: review.verdict,
            result
        })
    }

    /// Pick the first candidate that passes every check and is not blocked.
    ///
    /// Candidates are classified in parallel, then reviewed in order. Each
    /// rejection before the selected one is kept as a [`RejectedAttempt`].
    /// Backend syntax errors reject the candidate; other connector errors
    /// abort the screening.
    pub async fn screen_candidates<A: AsRef<str>>(
        &self,
        candidates: &[String],
        allowed: &[A]
    ) -> GateResult<Screening> {
        let dialect = self.connector.backend().dialect();
        let classified: Vec<_> = candidates
            .par_iter()
            .map(|sql| classify(sql, dialect))
            .collect();

        let mut attempts = Vec::new();
        for (index, (sql, outcome)) in candidates.iter().zip(classified).enumerate() {
            let reason = match outcome {
                Err(e) => e.to_string(),
                Ok(statement) => match self.review_statement(statement, allowed).await {
                    Ok(review) if !review.verdict.is_blocked() => {
                        return Ok(Screening {
                            selected: Some((index, review)),
                            attempts
                        });
                    }
                    Ok(review) => review.verdict.reasons.join("; "),
                    Err(
                        e @ (GateError::Whitelist(_)
                        | GateError::Connector(ConnectorError::SyntaxError {
                            ..
                        }))
                    ) => e.to_string(),
                    Err(e) => return Err(e)
                }
            };
            warn!(candidate = index, reason = %reason, "candidate rejected");
            attempts.push(RejectedAttempt {
                sql: sql.clone(),
                reason
            });
        }
        Ok(Screening {
            selected: None,
            attempts
        })
    }

    /// Screen candidates and approve the first acceptable one, carrying the
    /// rejected attempts into its audit event.
    ///
    /// # Errors
    ///
    /// [`GateError::Blocked`] with every rejection reason when no candidate
    /// survives screening, otherwise as [`Gate::approve_and_execute`].
    pub async fn approve_first<A: AsRef<str>>(
        &self,
        candidates: &[String],
        allowed: &[A],
        question: Option<String>
    ) -> GateResult<Approval> {
        let screening = self.screen_candidates(candidates, allowed).await?;
        let Some((_, review)) = screening.selected else {
            return Err(GateError::Blocked {
                reasons: screening.attempts.into_iter().map(|a| a.reason).collect()
            });
        };
        self.approve_and_execute(ApprovalRequest {
            sql: review.statement.sql,
            question,
            allowed_tables: allowed.iter().map(|a| a.as_ref().to_string()).collect(),
            row_cap: None,
            preview_rows: None,
            attempts: screening.attempts
        })
        .await
    }

    /// Fully-qualified provenance keys; unqualified tables get the default
    /// schema.
    fn provenance_keys(&self, statement: &SqlStatement) -> Vec<String> {
        let default_schema = self
            .default_schema
            .as_deref()
            .unwrap_or_else(|| self.connector.backend().default_schema());
        let mut keys: Vec<String> = Vec::new();
        for table in &statement.tables {
            let key = match (&table.schema, default_schema) {
                (Some(schema), _) => format!("{}.{}", schema, table.name),
                (None, "") => table.name.to_string(),
                (None, schema) => format!("{}.{}", schema, table.name)
            };
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

/// SHA-256 over the canonical JSON of the first `n` rows, hex encoded.
///
/// Rows are positional arrays, so field order is fixed by the column order
/// of the result set.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use sql_approval_gate::gate::preview_hash;
///
/// let rows = vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]];
/// let first = preview_hash(&rows, 1).unwrap();
/// assert_eq!(first, preview_hash(&rows[..1], 50).unwrap());
/// assert_eq!(first.len(), 64);
/// ```
pub fn preview_hash(rows: &[Vec<Value>], n: usize) -> GateResult<String> {
    let preview = &rows[..rows.len().min(n)];
    let bytes = serde_json::to_vec(preview).map_err(|e| GateError::Audit {
        message: format!("failed to encode preview rows: {}", e)
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
