//! PostgreSQL connector.
//!
//! Every pooled connection starts with `default_transaction_read_only = on`,
//! and each bounded execution additionally runs inside a `BEGIN READ ONLY`
//! transaction that is rolled back afterwards.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    Column, Executor, Row,
    postgres::{PgPool, PgPoolOptions, PgRow}
};
use tracing::{debug, warn};

use super::{
    BackendKind, Connector, ConnectorResult, classify_sqlx_error,
    types::{ConnectionInfo, ReadOnlyLevel, ResultSet, TableCard, group_columns, samples_by_column},
    value::{column_names, pg_value}
};
use crate::plan::NativePlan;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

const INTROSPECT_SQL: &str = r#"
    SELECT
        table_schema::text,
        table_name::text,
        column_name::text,
        data_type::text
    FROM information_schema.columns
    WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
      AND table_schema NOT LIKE 'pg_toast%'
      AND table_schema NOT LIKE 'pg_temp%'
    ORDER BY table_schema, table_name, ordinal_position
"#;

pub struct PostgresConnector {
    pool: PgPool
}

impl PostgresConnector {
    /// Open a small pool whose connections are read-only from the start.
    pub async fn connect(dsn: &str) -> ConnectorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET default_transaction_read_only = on")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(dsn)
            .await
            .map_err(|e| classify_sqlx_error(e, ACQUIRE_TIMEOUT.as_millis() as u64))?;
        Ok(Self {
            pool
        })
    }

    fn row_values(rows: &[PgRow]) -> Vec<Vec<serde_json::Value>> {
        rows.iter()
            .map(|row| (0..row.len()).map(|idx| pg_value(row, idx)).collect())
            .collect()
    }

    fn rows_to_json(rows: &[PgRow]) -> (Vec<String>, Vec<Vec<serde_json::Value>>) {
        let columns = rows.first().map(column_names).unwrap_or_default();
        (columns, Self::row_values(rows))
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn test_connection(&self) -> ConnectorResult<ConnectionInfo> {
        let version: String = sqlx::query_scalar("SELECT version()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, 0))?;
        Ok(ConnectionInfo {
            ok: true,
            version,
            supports_cost_estimate: true
        })
    }

    async fn introspect_schema(&self, sample_limit: usize) -> ConnectorResult<Vec<TableCard>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(INTROSPECT_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, 0))?;
        let mut cards = group_columns(rows);

        for card in &mut cards {
            let sql = format!(
                "SELECT * FROM {}.{} LIMIT {}",
                self.quote_identifier(&card.schema),
                self.quote_identifier(&card.table),
                sample_limit
            );
            match sqlx::query(&sql).fetch_all(&self.pool).await {
                Ok(rows) => {
                    let (columns, values) = Self::rows_to_json(&rows);
                    card.samples = samples_by_column(&columns, &values, sample_limit);
                }
                Err(e) => warn!(table = %card.qualified(), error = %e, "sampling failed")
            }
        }
        debug!(tables = cards.len(), "schema introspected");
        Ok(cards)
    }

    async fn enforce_session_readonly(&self) -> ConnectorResult<ReadOnlyLevel> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| classify_sqlx_error(e, 0))?;
        sqlx::query("SET default_transaction_read_only = on")
            .execute(&mut *conn)
            .await
            .map_err(|e| classify_sqlx_error(e, 0))?;
        let setting: String = sqlx::query_scalar("SHOW default_transaction_read_only")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| classify_sqlx_error(e, 0))?;
        if setting.eq_ignore_ascii_case("on") {
            Ok(ReadOnlyLevel::Session)
        } else {
            Err(crate::error::ConnectorError::unsupported(format!(
                "default_transaction_read_only is '{}'",
                setting
            )))
        }
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    async fn explain(&self, sql: &str) -> ConnectorResult<NativePlan> {
        let plan: serde_json::Value = sqlx::query_scalar(&format!("EXPLAIN (FORMAT JSON) {}", sql))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, 0))?;
        Ok(NativePlan::JsonTree(plan))
    }

    async fn execute_readonly(
        &self,
        sql: &str,
        row_cap: usize,
        time_budget: Duration
    ) -> ConnectorResult<ResultSet> {
        let budget_ms = time_budget.as_millis() as u64;
        let mut tx = self
            .pool
            .begin_with("BEGIN READ ONLY")
            .await
            .map_err(|e| classify_sqlx_error(e, budget_ms))?;
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(format!("{}ms", budget_ms))
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_sqlx_error(e, budget_ms))?;

        let bounded = self.bounded_sql(sql, ResultSet::fetch_limit(row_cap));
        let rows = sqlx::query(&bounded)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| classify_sqlx_error(e, budget_ms))?;
        // An empty result carries no row metadata
        let columns = match rows.first() {
            Some(row) => column_names(row),
            None => (&mut *tx)
                .describe(&bounded)
                .await
                .map(|d| d.columns().iter().map(|c| c.name().to_string()).collect())
                .map_err(|e| classify_sqlx_error(e, budget_ms))?
        };
        tx.rollback()
            .await
            .map_err(|e| classify_sqlx_error(e, budget_ms))?;

        let values = Self::row_values(&rows);
        debug!(rows = values.len(), row_cap, "bounded execution finished");
        Ok(ResultSet::capped(columns, values, row_cap))
    }
}
