//! Backend-neutral connector types.

use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use serde::Serialize;

use crate::{error::ConnectorError, query::SqlDialect};

/// Backend tag, parsed once from the connection string scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    MySql,
    Snowflake
}

impl BackendKind {
    /// Backend from a DSN such as `postgres://...` or `mysql+pymysql://...`
    ///
    /// # Example
    ///
    /// ```
    /// use sql_approval_gate::connector::BackendKind;
    ///
    /// let kind = BackendKind::from_dsn("postgresql://u:p@localhost/db").unwrap();
    /// assert_eq!(kind, BackendKind::Postgres);
    /// ```
    pub fn from_dsn(dsn: &str) -> Result<Self, ConnectorError> {
        let scheme = dsn
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| ConnectorError::unsupported("connection string has no scheme"))?;
        scheme.parse()
    }

    /// Catalog schemas specific to this backend, always blocked
    pub fn system_schemas(self) -> &'static [&'static str] {
        match self {
            Self::Postgres => &["pg_toast"],
            Self::MySql => &["mysql", "performance_schema", "sys"],
            Self::Snowflake => &["account_usage"]
        }
    }

    /// Node label marking a full table scan in adapted plans
    pub fn full_scan_marker(self) -> Option<&'static str> {
        match self {
            Self::Postgres => Some("Seq Scan"),
            Self::MySql => Some("ALL"),
            Self::Snowflake => None
        }
    }

    /// Schema assumed for unqualified tables
    pub fn default_schema(self) -> &'static str {
        match self {
            Self::Postgres => "public",
            Self::MySql => "",
            Self::Snowflake => "PUBLIC"
        }
    }

    /// Whether EXPLAIN returns a structured plan with cost estimates
    pub fn structured_plans(self) -> bool {
        !matches!(self, Self::Snowflake)
    }

    pub fn dialect(self) -> SqlDialect {
        match self {
            Self::Postgres => SqlDialect::PostgreSQL,
            Self::MySql => SqlDialect::MySQL,
            Self::Snowflake => SqlDialect::Snowflake
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "postgresql+psycopg" => Ok(Self::Postgres),
            "mysql" | "mysql+pymysql" | "mariadb" => Ok(Self::MySql),
            "snowflake" => Ok(Self::Snowflake),
            other => Err(ConnectorError::unsupported(format!(
                "unsupported backend scheme '{}'",
                other
            )))
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::MySql => write!(f, "mysql"),
            Self::Snowflake => write!(f, "snowflake")
        }
    }
}

/// Result of a connectivity probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub ok:                     bool,
    pub version:                String,
    /// Whether EXPLAIN reports cost estimates
    pub supports_cost_estimate: bool
}

/// Read-only guarantee a connector can actually give.
///
/// Ordered from strongest to weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadOnlyLevel {
    /// Every transaction on the session is read-only
    Session,
    /// Writes without a key predicate are refused; relies on a read-only user
    SafeUpdates,
    /// Only the granted role keeps the session read-only
    RoleOnly
}

impl fmt::Display for ReadOnlyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::SafeUpdates => write!(f, "safe_updates"),
            Self::RoleOnly => write!(f, "role_only")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnCard {
    pub name:      String,
    pub data_type: String
}

/// Introspected table: columns plus a few sample values per column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableCard {
    pub schema:  String,
    pub table:   String,
    pub columns: Vec<ColumnCard>,
    pub samples: IndexMap<String, Vec<serde_json::Value>>
}

impl TableCard {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Rows returned by a bounded execution.
///
/// `rows` are positional and follow `columns`. `truncated` is set when the
/// backend had more rows than the cap allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns:   Vec<String>,
    pub rows:      Vec<Vec<serde_json::Value>>,
    pub truncated: bool
}

impl ResultSet {
    /// Rows to fetch for a cap of `row_cap`: one extra row reveals truncation.
    ///
    /// ```
    /// use sql_approval_gate::connector::ResultSet;
    ///
    /// assert_eq!(ResultSet::fetch_limit(50), 51);
    /// assert_eq!(ResultSet::fetch_limit(usize::MAX), usize::MAX);
    /// ```
    pub fn fetch_limit(row_cap: usize) -> usize {
        row_cap.saturating_add(1)
    }

    /// Build from at most `row_cap + 1` fetched rows, dropping the extra row.
    pub fn capped(columns: Vec<String>, mut rows: Vec<Vec<serde_json::Value>>, row_cap: usize) -> Self {
        let truncated = rows.len() > row_cap;
        rows.truncate(row_cap);
        Self {
            columns,
            rows,
            truncated
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Collect rows into per-column sample lists, at most `limit` values each
pub fn samples_by_column(
    columns: &[String],
    rows: &[Vec<serde_json::Value>],
    limit: usize
) -> IndexMap<String, Vec<serde_json::Value>> {
    let mut samples: IndexMap<String, Vec<serde_json::Value>> = columns
        .iter()
        .map(|c| (c.clone(), Vec::new()))
        .collect();
    for row in rows.iter().take(limit) {
        for (column, value) in columns.iter().zip(row) {
            if let Some(values) = samples.get_mut(column) {
                values.push(value.clone());
            }
        }
    }
    samples
}

/// Group `(schema, table, column, data_type)` rows into cards without samples.
///
/// Rows must arrive ordered by table; column order is kept.
pub fn group_columns<I>(rows: I) -> Vec<TableCard>
where
    I: IntoIterator<Item = (String, String, String, String)>
{
    let mut tables: IndexMap<(String, String), Vec<ColumnCard>> = IndexMap::new();
    for (schema, table, name, data_type) in rows {
        tables.entry((schema, table)).or_default().push(ColumnCard {
            name,
            data_type
        });
    }
    tables
        .into_iter()
        .map(|((schema, table), columns)| TableCard {
            schema,
            table,
            columns,
            samples: IndexMap::new()
        })
        .collect()
}
