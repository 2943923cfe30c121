//! Table provenance lookup.
//!
//! Provenance ties a table to the most recent data load that populated it.
//! This crate only reads it; the ingestion side owns the records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use crate::{
    connector::classify_sqlx_error,
    error::{GateError, GateResult}
};

/// Lineage of one fully-qualified table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableProvenance {
    pub table:        String,
    pub source_url:   Option<String>,
    pub content_hash: Option<String>,
    pub row_count:    Option<i64>,
    pub byte_size:    Option<i64>,
    pub ingested_at:  Option<DateTime<Utc>>
}

/// Source of ingestion records.
#[async_trait]
pub trait ProvenanceSource: Send + Sync {
    /// Most recent ingestion of `table`, if any.
    async fn latest_ingestion(&self, table: &str) -> GateResult<Option<TableProvenance>>;

    /// Latest ingestion for each of `tables`; tables never ingested are left out.
    async fn latest_for(&self, tables: &[String]) -> GateResult<Vec<TableProvenance>> {
        let mut found = Vec::with_capacity(tables.len());
        for table in tables {
            if let Some(record) = self.latest_ingestion(table).await? {
                found.push(record);
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl<T: ProvenanceSource + ?Sized> ProvenanceSource for Box<T> {
    async fn latest_ingestion(&self, table: &str) -> GateResult<Option<TableProvenance>> {
        (**self).latest_ingestion(table).await
    }

    async fn latest_for(&self, tables: &[String]) -> GateResult<Vec<TableProvenance>> {
        (**self).latest_for(tables).await
    }
}

/// Source for deployments without an ingestion log.
pub struct NoProvenance;

#[async_trait]
impl ProvenanceSource for NoProvenance {
    async fn latest_ingestion(&self, _table: &str) -> GateResult<Option<TableProvenance>> {
        Ok(None)
    }
}

/// In-process records, latest by `ingested_at` and then by insertion order.
#[derive(Default)]
pub struct MemoryProvenance {
    records: Vec<(u64, TableProvenance)>
}

impl MemoryProvenance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; later records win ties on `ingested_at`.
    pub fn record(&mut self, provenance: TableProvenance) -> &mut Self {
        let seq = self.records.len() as u64 + 1;
        self.records.push((seq, provenance));
        self
    }
}

#[async_trait]
impl ProvenanceSource for MemoryProvenance {
    async fn latest_ingestion(&self, table: &str) -> GateResult<Option<TableProvenance>> {
        Ok(self
            .records
            .iter()
            .filter(|(_, p)| p.table == table)
            .max_by_key(|(seq, p)| (p.ingested_at, *seq))
            .map(|(_, p)| p.clone()))
    }
}

const LATEST_ONE_SQL: &str = r#"
    SELECT table_name, url, sha256, row_count, bytes, created_at
    FROM ingestion_log
    WHERE table_name = $1
    ORDER BY created_at DESC NULLS LAST, id DESC
    LIMIT 1
"#;

const LATEST_MANY_SQL: &str = r#"
    SELECT DISTINCT ON (table_name)
           table_name, url, sha256, row_count, bytes, created_at
    FROM ingestion_log
    WHERE table_name = ANY($1)
    ORDER BY table_name, created_at DESC NULLS LAST, id DESC
"#;

type IngestionRow = (
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<DateTime<Utc>>
);

fn from_row(row: IngestionRow) -> TableProvenance {
    let (table, source_url, content_hash, row_count, byte_size, ingested_at) = row;
    TableProvenance {
        table,
        source_url,
        content_hash,
        row_count,
        byte_size,
        ingested_at
    }
}

fn provenance_error(err: sqlx::Error) -> GateError {
    GateError::Provenance {
        message: classify_sqlx_error(err, 0).to_string()
    }
}

/// `ingestion_log` table in PostgreSQL.
pub struct PgIngestionLog {
    pool: PgPool
}

impl PgIngestionLog {
    pub async fn connect(dsn: &str) -> GateResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(dsn)
            .await
            .map_err(provenance_error)?;
        Ok(Self {
            pool
        })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool
        }
    }
}

#[async_trait]
impl ProvenanceSource for PgIngestionLog {
    async fn latest_ingestion(&self, table: &str) -> GateResult<Option<TableProvenance>> {
        let row: Option<IngestionRow> = sqlx::query_as(LATEST_ONE_SQL)
            .bind(table)
            .fetch_optional(&self.pool)
            .await
            .map_err(provenance_error)?;
        Ok(row.map(from_row))
    }

    async fn latest_for(&self, tables: &[String]) -> GateResult<Vec<TableProvenance>> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<IngestionRow> = sqlx::query_as(LATEST_MANY_SQL)
            .bind(tables)
            .fetch_all(&self.pool)
            .await
            .map_err(provenance_error)?;
        debug!(requested = tables.len(), found = rows.len(), "provenance resolved");
        Ok(rows.into_iter().map(from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn record(table: &str, url: &str, ts: i64) -> TableProvenance {
        TableProvenance {
            table:        table.into(),
            source_url:   Some(url.into()),
            content_hash: None,
            row_count:    Some(1),
            byte_size:    None,
            ingested_at:  Utc.timestamp_opt(ts, 0).single()
        }
    }

    #[tokio::test]
    async fn test_memory_latest_by_time() {
        let mut source = MemoryProvenance::new();
        source
            .record(record("public.items", "https://a", 200))
            .record(record("public.items", "https://b", 100));
        let latest = source.latest_ingestion("public.items").await.unwrap().unwrap();
        assert_eq!(latest.source_url.as_deref(), Some("https://a"));
    }

    #[tokio::test]
    async fn test_memory_tie_prefers_higher_sequence() {
        let mut source = MemoryProvenance::new();
        source
            .record(record("public.items", "https://first", 100))
            .record(record("public.items", "https://second", 100));
        let latest = source.latest_ingestion("public.items").await.unwrap().unwrap();
        assert_eq!(latest.source_url.as_deref(), Some("https://second"));
    }

    #[tokio::test]
    async fn test_latest_for_skips_unknown() {
        let mut source = MemoryProvenance::new();
        source.record(record("public.items", "https://a", 1));
        let found = source
            .latest_for(&["public.items".to_string(), "public.other".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(NoProvenance.latest_ingestion("x").await.unwrap().is_none());
    }
}
