//! MySQL connector.
//!
//! Sessions run with `sql_safe_updates` and read-only transactions. EXPLAIN
//! output is the classic tabular form, one row per accessed table. The time
//! budget travels as a `MAX_EXECUTION_TIME` optimizer hint on the bounded
//! SELECT, so nothing outlives the statement on the pooled connection.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Map;
use sqlx::{
    Column, Executor, Row,
    mysql::{MySqlPool, MySqlPoolOptions, MySqlRow}
};
use tracing::{debug, warn};

use super::{
    BackendKind, Connector, ConnectorResult, classify_sqlx_error,
    types::{ConnectionInfo, ReadOnlyLevel, ResultSet, TableCard, group_columns, samples_by_column},
    value::{column_names, mysql_value}
};
use crate::plan::NativePlan;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const INTROSPECT_SQL: &str = r#"
    SELECT
        CAST(c.TABLE_SCHEMA AS CHAR),
        CAST(c.TABLE_NAME AS CHAR),
        CAST(c.COLUMN_NAME AS CHAR),
        CAST(c.DATA_TYPE AS CHAR)
    FROM INFORMATION_SCHEMA.COLUMNS c
    JOIN INFORMATION_SCHEMA.TABLES t
      ON t.TABLE_SCHEMA = c.TABLE_SCHEMA AND t.TABLE_NAME = c.TABLE_NAME
    WHERE t.TABLE_TYPE = 'BASE TABLE'
      AND c.TABLE_SCHEMA NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys')
    ORDER BY c.TABLE_SCHEMA, c.TABLE_NAME, c.ORDINAL_POSITION
"#;

pub struct MySqlConnector {
    pool: MySqlPool
}

impl MySqlConnector {
    pub async fn connect(dsn: &str) -> ConnectorResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    (&mut *conn).execute("SET SESSION sql_safe_updates = 1").await?;
                    (&mut *conn).execute("SET SESSION TRANSACTION READ ONLY").await?;
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

    fn row_values(rows: &[MySqlRow]) -> Vec<Vec<serde_json::Value>> {
        rows.iter()
            .map(|row| (0..row.len()).map(|idx| mysql_value(row, idx)).collect())
            .collect()
    }

    fn rows_to_json(rows: &[MySqlRow]) -> (Vec<String>, Vec<Vec<serde_json::Value>>) {
        let columns = rows.first().map(column_names).unwrap_or_default();
        (columns, Self::row_values(rows))
    }
}

/// Derived table rather than a CTE; MySQL 5.7 has no `WITH`.
///
/// The inner text sits on its own lines so a trailing `--` comment cannot
/// swallow the closing parenthesis.
fn derived_table_sql(sql: &str, n: usize, budget_ms: Option<u64>) -> String {
    let hint = budget_ms
        .map(|ms| format!("/*+ MAX_EXECUTION_TIME({}) */ ", ms))
        .unwrap_or_default();
    format!("SELECT {}* FROM (\n{}\n) AS t LIMIT {}", hint, sql, n)
}

#[async_trait]
impl Connector for MySqlConnector {
    fn backend(&self) -> BackendKind {
        BackendKind::MySql
    }

    async fn test_connection(&self) -> ConnectorResult<ConnectionInfo> {
        let version: String = sqlx::query_scalar("SELECT CAST(VERSION() AS CHAR)")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, 0))?;
        Ok(ConnectionInfo {
            ok: true,
            version,
            supports_cost_estimate: false
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

    /// Session-level read-only when the server accepted it, otherwise only
    /// safe-update mode holds and a read-only user is expected.
    async fn enforce_session_readonly(&self) -> ConnectorResult<ReadOnlyLevel> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| classify_sqlx_error(e, 0))?;
        (&mut *conn)
            .execute("SET SESSION sql_safe_updates = 1")
            .await
            .map_err(|e| classify_sqlx_error(e, 0))?;
        if let Err(e) = (&mut *conn).execute("SET SESSION TRANSACTION READ ONLY").await {
            warn!(error = %e, "session read-only rejected, relying on safe updates");
            return Ok(ReadOnlyLevel::SafeUpdates);
        }
        let read_only: i64 = sqlx::query_scalar("SELECT CAST(@@SESSION.transaction_read_only AS SIGNED)")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| classify_sqlx_error(e, 0))?;
        if read_only == 1 {
            Ok(ReadOnlyLevel::Session)
        } else {
            Ok(ReadOnlyLevel::SafeUpdates)
        }
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn bounded_sql(&self, sql: &str, n: usize) -> String {
        derived_table_sql(sql, n, None)
    }

    async fn explain(&self, sql: &str) -> ConnectorResult<NativePlan> {
        let rows = sqlx::query(&format!("EXPLAIN {}", sql))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, 0))?;
        let (columns, values) = Self::rows_to_json(&rows);
        let plan = values
            .into_iter()
            .map(|row| columns.iter().cloned().zip(row).collect::<Map<_, _>>())
            .collect();
        Ok(NativePlan::RowList(plan))
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
            .begin_with("START TRANSACTION READ ONLY")
            .await
            .map_err(|e| classify_sqlx_error(e, budget_ms))?;

        let bounded = derived_table_sql(sql, ResultSet::fetch_limit(row_cap), Some(budget_ms));
        let rows = sqlx::query(&bounded)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| classify_sqlx_error(e, budget_ms))?;
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

#[cfg(test)]
mod tests {
    use sqlparser::{dialect::MySqlDialect, parser::Parser};

    use super::*;

    #[test]
    fn test_derived_table_survives_trailing_comment() {
        let sql = derived_table_sql("SELECT id FROM items -- newest first", 11, None);
        assert_eq!(
            sql,
            "SELECT * FROM (\nSELECT id FROM items -- newest first\n) AS t LIMIT 11"
        );
        assert!(Parser::parse_sql(&MySqlDialect {}, &sql).is_ok());
    }

    #[test]
    fn test_execution_hint_on_outer_select() {
        let sql = derived_table_sql("SELECT 1", 51, Some(2500));
        assert!(sql.starts_with("SELECT /*+ MAX_EXECUTION_TIME(2500) */ * FROM ("));
        assert!(sql.ends_with(") AS t LIMIT 51"));
    }
}
