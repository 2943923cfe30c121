//! Snowflake connector over the SQL API (`/api/v2/statements`).
//!
//! Snowflake has no session-level read-only switch, so the guarantee comes
//! from the role the token is bound to. EXPLAIN is requested as text and
//! carries no cost figures.
//!
//! DSN format:
//!
//! ```text
//! snowflake://user@account/DATABASE/SCHEMA?warehouse=WH&role=READER
//! ```
//!
//! An optional `host` query parameter overrides the API base URL and
//! `token_type` overrides the bearer token type (`OAUTH` by default).

use std::{
    collections::HashMap,
    time::{Duration, Instant}
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

use super::{
    BackendKind, Connector, ConnectorResult,
    types::{ConnectionInfo, ReadOnlyLevel, ResultSet, TableCard, group_columns, samples_by_column}
};
use crate::{error::ConnectorError, plan::NativePlan};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const METADATA_BUDGET: Duration = Duration::from_secs(30);
/// Snowflake error code for a statement cancelled by its timeout
const STATEMENT_TIMEOUT_CODE: &str = "000630";

/// Where and as whom statements run.
#[derive(Debug, Clone, PartialEq)]
pub struct SnowflakeTarget {
    pub account:    String,
    pub user:       Option<String>,
    pub database:   Option<String>,
    pub schema:     Option<String>,
    pub warehouse:  Option<String>,
    pub role:       Option<String>,
    pub base_url:   String,
    pub token_type: String
}

impl SnowflakeTarget {
    /// Parse a `snowflake://` DSN.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Unsupported`] for a malformed DSN or one
    /// without an account.
    pub fn parse(dsn: &str) -> ConnectorResult<Self> {
        let url = Url::parse(dsn)
            .map_err(|e| ConnectorError::unsupported(format!("invalid snowflake DSN: {}", e)))?;
        if url.scheme() != "snowflake" {
            return Err(ConnectorError::unsupported(format!(
                "unsupported DSN scheme for snowflake: {}",
                url.scheme()
            )));
        }
        let account = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConnectorError::unsupported("snowflake DSN has no account"))?
            .to_string();
        let mut path = url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
            .into_iter();
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();

        let base_url = query
            .get("host")
            .map(|h| h.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{}.snowflakecomputing.com", account));
        Ok(Self {
            user: Some(url.username().to_string()).filter(|u| !u.is_empty()),
            database: path.next(),
            schema: path.next(),
            warehouse: query.get("warehouse").cloned(),
            role: query.get("role").cloned(),
            token_type: query
                .get("token_type")
                .cloned()
                .unwrap_or_else(|| "OAUTH".to_string()),
            base_url,
            account
        })
    }
}

pub struct SnowflakeConnector {
    target: SnowflakeTarget,
    token:  String,
    client: reqwest::Client
}

#[derive(Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    /// Seconds
    timeout:   u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    database:  Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema:    Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role:      Option<&'a str>
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    statement_handle:    Option<String>,
    #[serde(default)]
    code:                Option<String>,
    #[serde(default)]
    message:             Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultMetaData>,
    #[serde(default)]
    data:                Vec<Vec<Option<String>>>
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ResultMetaData {
    #[serde(default)]
    row_type:       Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<Value>
}

#[derive(Deserialize, Clone)]
struct RowType {
    name:  String,
    #[serde(rename = "type")]
    kind:  String,
    #[serde(default)]
    scale: Option<i64>
}

/// Completed statement with every fetched partition appended.
struct StatementResult {
    columns: Vec<RowType>,
    rows:    Vec<Vec<Option<String>>>
}

impl StatementResult {
    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn json_rows(&self) -> Vec<Vec<Value>> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&self.columns)
                    .map(|(cell, column)| cell_value(column, cell.as_deref()))
                    .collect()
            })
            .collect()
    }

    fn text_column(&self, idx: usize) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(idx).cloned().flatten())
            .collect()
    }
}

/// The SQL API returns every cell as a string; restore numbers and booleans.
fn cell_value(column: &RowType, cell: Option<&str>) -> Value {
    let Some(cell) = cell else {
        return Value::Null;
    };
    match column.kind.as_str() {
        "fixed" if column.scale.unwrap_or(0) == 0 => cell
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(cell.to_string())),
        "real" => cell
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(cell.to_string())),
        "boolean" => match cell.to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::String(cell.to_string())
        },
        _ => Value::String(cell.to_string())
    }
}

fn status_error(status: reqwest::StatusCode, body: &str, timeout_ms: u64) -> ConnectorError {
    let parsed: StatementResponse = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.message.unwrap_or_else(|| body.to_string());
    match status.as_u16() {
        401 | 403 => ConnectorError::auth_failed(message),
        408 => ConnectorError::Timeout {
            timeout_ms
        },
        422 if parsed.code.as_deref() == Some(STATEMENT_TIMEOUT_CODE) => ConnectorError::Timeout {
            timeout_ms
        },
        400 | 422 => ConnectorError::syntax_error(message),
        429 | 500..=599 => ConnectorError::unreachable(format!("HTTP {}: {}", status, message)),
        _ => ConnectorError::unsupported(format!("HTTP {}: {}", status, message))
    }
}

fn transport_error(err: reqwest::Error, timeout_ms: u64) -> ConnectorError {
    if err.is_timeout() {
        ConnectorError::Timeout {
            timeout_ms
        }
    } else {
        ConnectorError::unreachable(err.to_string())
    }
}

impl SnowflakeConnector {
    pub fn new(target: SnowflakeTarget, token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            target,
            token: token.into(),
            client
        }
    }

    pub fn target(&self) -> &SnowflakeTarget {
        &self.target
    }

    fn statements_url(&self) -> String {
        format!("{}/api/v2/statements", self.target.base_url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-Snowflake-Authorization-Token-Type", &self.target.token_type)
            .header("Accept", "application/json")
    }

    async fn read(
        &self,
        response: reqwest::Response,
        timeout_ms: u64
    ) -> ConnectorResult<(u16, StatementResponse)> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(status_error(status, &body, timeout_ms));
        }
        let parsed = serde_json::from_str(&body).map_err(|e| {
            ConnectorError::unsupported(format!("failed to parse SQL API response: {}", e))
        })?;
        Ok((status.as_u16(), parsed))
    }

    /// Submit `statement`, wait for completion and fetch up to `max_rows`
    /// rows across partitions.
    async fn run(
        &self,
        statement: &str,
        budget: Duration,
        max_rows: Option<usize>
    ) -> ConnectorResult<StatementResult> {
        let timeout_ms = budget.as_millis() as u64;
        let deadline = Instant::now() + budget;
        let request = StatementRequest {
            statement,
            timeout: budget.as_secs().max(1),
            database: self.target.database.as_deref(),
            schema: self.target.schema.as_deref(),
            warehouse: self.target.warehouse.as_deref(),
            role: self.target.role.as_deref()
        };

        let response = self
            .authorized(self.client.post(self.statements_url()))
            .timeout(budget)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout_ms))?;
        let (mut status, mut first) = self.read(response, timeout_ms).await?;

        // 202: still running, poll the handle until it completes
        while status == 202 {
            if Instant::now() >= deadline {
                return Err(ConnectorError::Timeout {
                    timeout_ms
                });
            }
            sleep(POLL_INTERVAL).await;
            let handle = first
                .statement_handle
                .clone()
                .ok_or_else(|| ConnectorError::unsupported("accepted statement has no handle"))?;
            let response = self
                .authorized(self.client.get(format!("{}/{}", self.statements_url(), handle)))
                .timeout(deadline.saturating_duration_since(Instant::now()))
                .send()
                .await
                .map_err(|e| transport_error(e, timeout_ms))?;
            (status, first) = self.read(response, timeout_ms).await?;
        }

        let meta = first.result_set_meta_data.take().unwrap_or_default();
        let mut rows = std::mem::take(&mut first.data);
        let limit = max_rows.unwrap_or(usize::MAX);
        if let Some(handle) = first.statement_handle.as_deref() {
            for partition in 1..meta.partition_info.len() {
                if rows.len() >= limit {
                    break;
                }
                let response = self
                    .authorized(self.client.get(format!("{}/{}", self.statements_url(), handle)))
                    .query(&[("partition", partition)])
                    .timeout(deadline.saturating_duration_since(Instant::now()))
                    .send()
                    .await
                    .map_err(|e| transport_error(e, timeout_ms))?;
                let (_, page) = self.read(response, timeout_ms).await?;
                rows.extend(page.data);
            }
        }
        rows.truncate(limit);
        debug!(rows = rows.len(), "snowflake statement finished");
        Ok(StatementResult {
            columns: meta.row_type,
            rows
        })
    }
}

#[async_trait]
impl Connector for SnowflakeConnector {
    fn backend(&self) -> BackendKind {
        BackendKind::Snowflake
    }

    async fn test_connection(&self) -> ConnectorResult<ConnectionInfo> {
        let result = self
            .run("SELECT CURRENT_VERSION()", METADATA_BUDGET, Some(1))
            .await?;
        Ok(ConnectionInfo {
            ok: true,
            version: result.text_column(0).into_iter().next().unwrap_or_default(),
            supports_cost_estimate: false
        })
    }

    async fn introspect_schema(&self, sample_limit: usize) -> ConnectorResult<Vec<TableCard>> {
        let result = self
            .run(
                "SELECT c.table_schema, c.table_name, c.column_name, c.data_type \
                 FROM information_schema.columns c \
                 JOIN information_schema.tables t \
                   ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
                 WHERE t.table_type = 'BASE TABLE' AND c.table_schema <> 'INFORMATION_SCHEMA' \
                 ORDER BY c.table_schema, c.table_name, c.ordinal_position",
                METADATA_BUDGET,
                None
            )
            .await?;
        let rows = result.rows.into_iter().filter_map(|row| {
            let mut cells = row.into_iter().map(Option::unwrap_or_default);
            Some((cells.next()?, cells.next()?, cells.next()?, cells.next()?))
        });
        let mut cards = group_columns(rows);

        for card in &mut cards {
            let sql = format!(
                "SELECT * FROM {}.{} LIMIT {}",
                self.quote_identifier(&card.schema),
                self.quote_identifier(&card.table),
                sample_limit
            );
            let sample = self.run(&sql, METADATA_BUDGET, Some(sample_limit)).await?;
            card.samples = samples_by_column(&sample.column_names(), &sample.json_rows(), sample_limit);
        }
        debug!(tables = cards.len(), "schema introspected");
        Ok(cards)
    }

    /// Nothing to switch on; reports the role the statements run under.
    async fn enforce_session_readonly(&self) -> ConnectorResult<ReadOnlyLevel> {
        let result = self
            .run("SELECT CURRENT_ROLE()", METADATA_BUDGET, Some(1))
            .await?;
        let role = result.text_column(0).into_iter().next().unwrap_or_default();
        info!(role = %role, "snowflake read-only relies on role grants");
        Ok(ReadOnlyLevel::RoleOnly)
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    async fn explain(&self, sql: &str) -> ConnectorResult<NativePlan> {
        let result = self
            .run(&format!("EXPLAIN USING TEXT {}", sql), METADATA_BUDGET, None)
            .await?;
        Ok(NativePlan::Text(result.text_column(0).join("\n")))
    }

    async fn execute_readonly(
        &self,
        sql: &str,
        row_cap: usize,
        time_budget: Duration
    ) -> ConnectorResult<ResultSet> {
        let fetch = ResultSet::fetch_limit(row_cap);
        let bounded = self.bounded_sql(sql, fetch);
        let result = self.run(&bounded, time_budget, Some(fetch)).await?;
        Ok(ResultSet::capped(
            result.column_names(),
            result.json_rows(),
            row_cap
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_dsn() {
        let target =
            SnowflakeTarget::parse("snowflake://reader@acme-xy123/ANALYTICS/PUBLIC?warehouse=WH&role=READER")
                .unwrap();
        assert_eq!(target.account, "acme-xy123");
        assert_eq!(target.user.as_deref(), Some("reader"));
        assert_eq!(target.database.as_deref(), Some("ANALYTICS"));
        assert_eq!(target.schema.as_deref(), Some("PUBLIC"));
        assert_eq!(target.warehouse.as_deref(), Some("WH"));
        assert_eq!(target.role.as_deref(), Some("READER"));
        assert_eq!(target.base_url, "https://acme-xy123.snowflakecomputing.com");
        assert_eq!(target.token_type, "OAUTH");
    }

    #[test]
    fn test_parse_host_override() {
        let target = SnowflakeTarget::parse("snowflake://acct/DB?host=http://127.0.0.1:9000/").unwrap();
        assert_eq!(target.base_url, "http://127.0.0.1:9000");
        assert_eq!(target.schema, None);
    }

    #[test]
    fn test_parse_rejects_other_scheme() {
        assert!(SnowflakeTarget::parse("postgres://localhost/db").is_err());
    }

    #[test]
    fn test_cell_values() {
        let fixed = RowType {
            name:  "n".into(),
            kind:  "fixed".into(),
            scale: Some(0)
        };
        let real = RowType {
            name:  "r".into(),
            kind:  "real".into(),
            scale: None
        };
        assert_eq!(cell_value(&fixed, Some("42")), Value::from(42));
        assert_eq!(cell_value(&real, Some("1.5")), Value::from(1.5));
        assert_eq!(cell_value(&fixed, None), Value::Null);
    }

    #[test]
    fn test_status_errors() {
        let auth = status_error(reqwest::StatusCode::UNAUTHORIZED, "{}", 10);
        assert!(matches!(auth, ConnectorError::AuthFailed { .. }));

        let body = r#"{"code":"000630","message":"Statement reached its statement or warehouse timeout"}"#;
        let timeout = status_error(reqwest::StatusCode::UNPROCESSABLE_ENTITY, body, 10);
        assert_eq!(
            timeout,
            ConnectorError::Timeout {
                timeout_ms: 10
            }
        );

        let body = r#"{"code":"001003","message":"SQL compilation error"}"#;
        let syntax = status_error(reqwest::StatusCode::UNPROCESSABLE_ENTITY, body, 10);
        assert_eq!(syntax, ConnectorError::syntax_error("SQL compilation error"));
    }
}
