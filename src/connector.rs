//! Database connectors.
//!
//! A [`Connector`] wraps one backend behind the same small surface: probe,
//! introspect, EXPLAIN and a bounded read-only execution. The gate only ever
//! talks to this trait, so adding a backend means adding an implementation
//! and a [`BackendKind`] variant.
//!
//! | Backend | Read-only guarantee | Plan shape | Timeout |
//! |---------|---------------------|------------|---------|
//! | PostgreSQL | read-only session and transaction | JSON tree | `statement_timeout` |
//! | MySQL | read-only transaction, safe updates | row list | `MAX_EXECUTION_TIME` |
//! | Snowflake | granted role only | text | `STATEMENT_TIMEOUT_IN_SECONDS` |

mod mysql;
mod postgres;
mod snowflake;
mod types;
mod value;

use std::time::Duration;

use async_trait::async_trait;
pub use mysql::MySqlConnector;
pub use postgres::PostgresConnector;
pub use snowflake::{SnowflakeConnector, SnowflakeTarget};
use tracing::info;
pub use types::{
    BackendKind, ColumnCard, ConnectionInfo, ReadOnlyLevel, ResultSet, TableCard, group_columns,
    samples_by_column
};

use crate::{error::ConnectorError, plan::NativePlan};

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Uniform capability surface over one database backend.
///
/// Implementations never retry; every failure surfaces as a
/// [`ConnectorError`].
#[async_trait]
pub trait Connector: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Connectivity probe with server version
    async fn test_connection(&self) -> ConnectorResult<ConnectionInfo>;

    /// Tables outside system schemas, with columns and up to `sample_limit`
    /// sample values per column
    async fn introspect_schema(&self, sample_limit: usize) -> ConnectorResult<Vec<TableCard>>;

    /// Put the session into read-only mode and report what was achieved
    async fn enforce_session_readonly(&self) -> ConnectorResult<ReadOnlyLevel>;

    fn quote_identifier(&self, identifier: &str) -> String;

    fn limit_clause(&self, n: usize) -> String {
        format!(" LIMIT {}", n)
    }

    /// Wrap `sql` so the backend never returns more than `n` rows.
    ///
    /// The inner text sits on its own lines, so a trailing `--` comment ends
    /// before the closing parenthesis.
    fn bounded_sql(&self, sql: &str, n: usize) -> String {
        format!("WITH cte AS (\n{}\n) SELECT * FROM cte{}", sql, self.limit_clause(n))
    }

    /// Estimated plan in the backend's native shape
    async fn explain(&self, sql: &str) -> ConnectorResult<NativePlan>;

    /// Run `sql` read-only, fetching at most `row_cap` rows within
    /// `time_budget`.
    async fn execute_readonly(
        &self,
        sql: &str,
        row_cap: usize,
        time_budget: Duration
    ) -> ConnectorResult<ResultSet>;
}

/// Connector chosen at runtime from a connection string.
pub enum AnyConnector {
    Postgres(PostgresConnector),
    MySql(MySqlConnector),
    Snowflake(SnowflakeConnector)
}

impl AnyConnector {
    /// Connect to the backend named by the DSN scheme.
    ///
    /// `token` is only used by Snowflake.
    ///
    /// # Errors
    ///
    /// Unsupported scheme, malformed DSN or a failed connection.
    pub async fn connect(dsn: &str, token: Option<&str>) -> ConnectorResult<Self> {
        let backend = BackendKind::from_dsn(dsn)?;
        info!(backend = %backend, "connecting");
        let connector = match backend {
            BackendKind::Postgres => Self::Postgres(PostgresConnector::connect(dsn).await?),
            BackendKind::MySql => Self::MySql(MySqlConnector::connect(dsn).await?),
            BackendKind::Snowflake => {
                let token = token.ok_or_else(|| {
                    ConnectorError::auth_failed("snowflake requires a bearer token")
                })?;
                Self::Snowflake(SnowflakeConnector::new(SnowflakeTarget::parse(dsn)?, token))
            }
        };
        Ok(connector)
    }

    fn inner(&self) -> &dyn Connector {
        match self {
            Self::Postgres(c) => c,
            Self::MySql(c) => c,
            Self::Snowflake(c) => c
        }
    }
}

#[async_trait]
impl Connector for AnyConnector {
    fn backend(&self) -> BackendKind {
        self.inner().backend()
    }

    async fn test_connection(&self) -> ConnectorResult<ConnectionInfo> {
        self.inner().test_connection().await
    }

    async fn introspect_schema(&self, sample_limit: usize) -> ConnectorResult<Vec<TableCard>> {
        self.inner().introspect_schema(sample_limit).await
    }

    async fn enforce_session_readonly(&self) -> ConnectorResult<ReadOnlyLevel> {
        self.inner().enforce_session_readonly().await
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        self.inner().quote_identifier(identifier)
    }

    fn limit_clause(&self, n: usize) -> String {
        self.inner().limit_clause(n)
    }

    fn bounded_sql(&self, sql: &str, n: usize) -> String {
        self.inner().bounded_sql(sql, n)
    }

    async fn explain(&self, sql: &str) -> ConnectorResult<NativePlan> {
        self.inner().explain(sql).await
    }

    async fn execute_readonly(
        &self,
        sql: &str,
        row_cap: usize,
        time_budget: Duration
    ) -> ConnectorResult<ResultSet> {
        self.inner()
            .execute_readonly(sql, row_cap, time_budget)
            .await
    }
}

/// MySQL error number for "maximum statement execution time exceeded"
const MYSQL_MAX_EXECUTION_TIME: u16 = 3024;

/// Map a driver error onto the connector taxonomy.
///
/// `timeout_ms` is reported when the backend cancelled the statement for
/// running over its budget.
pub fn classify_sqlx_error(err: sqlx::Error, timeout_ms: u64) -> ConnectorError {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            let mysql_number = db
                .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                .map(|e| e.number());
            if code.starts_with("28") {
                ConnectorError::auth_failed(db.message())
            } else if code == "57014" || mysql_number == Some(MYSQL_MAX_EXECUTION_TIME) {
                ConnectorError::Timeout {
                    timeout_ms
                }
            } else if code.starts_with("08") {
                ConnectorError::unreachable(db.message())
            } else {
                ConnectorError::syntax_error(db.message())
            }
        }
        sqlx::Error::Io(e) => ConnectorError::unreachable(e.to_string()),
        sqlx::Error::Tls(e) => ConnectorError::unreachable(e.to_string()),
        sqlx::Error::Protocol(msg) => ConnectorError::unreachable(msg),
        sqlx::Error::Configuration(e) => ConnectorError::unreachable(e.to_string()),
        e @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed) => {
            ConnectorError::unreachable(e.to_string())
        }
        other => ConnectorError::unsupported(other.to_string())
    }
}
