//! Append-only audit log.
//!
//! One SQLite table, one row per approved execution. The store is
//! constructed explicitly and shared behind an `Arc`; the connection mutex
//! is the single writer lock, so ids come out in write order. Row payloads
//! are never stored, only their count and preview hash.

use std::{
    fs,
    path::Path,
    sync::{Mutex, MutexGuard}
};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{GateError, GateResult},
    provenance::TableProvenance,
    risk::RiskLevel
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at    TEXT NOT NULL,
        question      TEXT,
        sql_text      TEXT NOT NULL,
        safe          INTEGER NOT NULL,
        level         TEXT NOT NULL,
        reasons       TEXT NOT NULL,
        row_count     INTEGER NOT NULL,
        truncated     INTEGER NOT NULL,
        preview_hash  TEXT NOT NULL,
        provenance    TEXT NOT NULL,
        attempts      TEXT NOT NULL
    );
"#;

const SELECT_COLUMNS: &str = "id, created_at, question, sql_text, safe, level, reasons, \
                              row_count, truncated, preview_hash, provenance, attempts";

/// Earlier SQL text that was rejected before the approved one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedAttempt {
    pub sql:    String,
    pub reason: String
}

/// Event contents before the store assigns an id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAuditEvent {
    pub question:     Option<String>,
    pub sql:          String,
    /// Passed classification and the whitelist
    pub safe:         bool,
    pub level:        RiskLevel,
    pub reasons:      Vec<String>,
    pub row_count:    usize,
    pub truncated:    bool,
    pub preview_hash: String,
    pub provenance:   Vec<TableProvenance>,
    pub attempts:     Vec<RejectedAttempt>
}

/// Persisted audit record. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id:           i64,
    pub created_at:   DateTime<Utc>,
    pub question:     Option<String>,
    pub sql:          String,
    pub safe:         bool,
    pub level:        RiskLevel,
    pub reasons:      Vec<String>,
    pub row_count:    usize,
    pub truncated:    bool,
    pub preview_hash: String,
    pub provenance:   Vec<TableProvenance>,
    pub attempts:     Vec<RejectedAttempt>
}

fn audit_failure(err: impl std::fmt::Display) -> GateError {
    GateError::Audit {
        message: err.to_string()
    }
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, text: &str) -> rusqlite::Result<T> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    let created_at: String = row.get(1)?;
    let level: String = row.get(5)?;
    let reasons: String = row.get(6)?;
    let provenance: String = row.get(10)?;
    let attempts: String = row.get(11)?;
    let row_count: i64 = row.get(7)?;
    Ok(AuditEvent {
        id:           row.get(0)?,
        created_at:   DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?,
        question:     row.get(2)?,
        sql:          row.get(3)?,
        safe:         row.get(4)?,
        level:        level.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
        })?,
        reasons:      json_column(6, &reasons)?,
        row_count:    row_count.max(0) as usize,
        truncated:    row.get(8)?,
        preview_hash: row.get(9)?,
        provenance:   json_column(10, &provenance)?,
        attempts:     json_column(11, &attempts)?
    })
}

/// SQLite-backed audit log.
pub struct AuditStore {
    conn: Mutex<Connection>
}

impl AuditStore {
    /// Open or create the log at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Audit`] when the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(audit_failure)?;
        }
        let conn = Connection::open(path).map_err(audit_failure)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(audit_failure)?;
        Self::init(conn)
    }

    /// Store that lives only as long as the process.
    pub fn open_memory() -> GateResult<Self> {
        Self::init(Connection::open_in_memory().map_err(audit_failure)?)
    }

    fn init(conn: Connection) -> GateResult<Self> {
        conn.execute_batch(SCHEMA).map_err(audit_failure)?;
        Ok(Self {
            conn: Mutex::new(conn)
        })
    }

    fn lock(&self) -> GateResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| audit_failure("audit store lock poisoned"))
    }

    /// Append one event inside a transaction and return it with its id.
    pub fn append(&self, event: NewAuditEvent) -> GateResult<AuditEvent> {
        let created_at = Utc::now();
        let reasons = serde_json::to_string(&event.reasons).map_err(audit_failure)?;
        let provenance = serde_json::to_string(&event.provenance).map_err(audit_failure)?;
        let attempts = serde_json::to_string(&event.attempts).map_err(audit_failure)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(audit_failure)?;
        tx.execute(
            "INSERT INTO audit_events (created_at, question, sql_text, safe, level, reasons, \
             row_count, truncated, preview_hash, provenance, attempts) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                created_at.to_rfc3339(),
                event.question,
                event.sql,
                event.safe,
                event.level.to_string(),
                reasons,
                event.row_count as i64,
                event.truncated,
                event.preview_hash,
                provenance,
                attempts
            ]
        )
        .map_err(audit_failure)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(audit_failure)?;

        info!(id, rows = event.row_count, hash = %event.preview_hash, "audit event written");
        Ok(AuditEvent {
            id,
            created_at,
            question: event.question,
            sql: event.sql,
            safe: event.safe,
            level: event.level,
            reasons: event.reasons,
            row_count: event.row_count,
            truncated: event.truncated,
            preview_hash: event.preview_hash,
            provenance: event.provenance,
            attempts: event.attempts
        })
    }

    /// Up to `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> GateResult<Vec<AuditEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM audit_events ORDER BY id DESC LIMIT ?1",
                SELECT_COLUMNS
            ))
            .map_err(audit_failure)?;
        let events = stmt
            .query_map(params![limit as i64], event_from_row)
            .map_err(audit_failure)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(audit_failure)?;
        Ok(events)
    }

    pub fn by_id(&self, id: i64) -> GateResult<Option<AuditEvent>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM audit_events WHERE id = ?1", SELECT_COLUMNS),
            params![id],
            event_from_row
        )
        .optional()
        .map_err(audit_failure)
    }

    /// Highest id written so far, `0` for an empty log.
    pub fn max_id(&self) -> GateResult<i64> {
        let conn = self.lock()?;
        conn.query_row("SELECT COALESCE(MAX(id), 0) FROM audit_events", [], |row| {
            row.get(0)
        })
        .map_err(audit_failure)
    }
}
