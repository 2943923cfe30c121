//! Table whitelist enforcement.
//!
//! A statement passes when none of its relations live in a blocked schema
//! and, if the caller supplied a context, every relation is in the allowed
//! set. Matching is case-insensitive.

use tracing::warn;

use crate::{
    connector::BackendKind,
    error::WhitelistRejection,
    query::{SqlStatement, TableRef}
};

/// Catalog schemas blocked for every backend, whatever the configuration says
pub const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "pg_catalog"];

/// Effective blocked-schema list: system catalogs, backend catalogs, then
/// configured extras. Lowercased and deduplicated.
pub fn blocked_schemas(backend: BackendKind, configured: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let all = SYSTEM_SCHEMAS
        .iter()
        .chain(backend.system_schemas())
        .map(|s| s.to_string())
        .chain(configured.iter().cloned());
    for schema in all {
        let schema = schema.to_lowercase();
        if !out.contains(&schema) {
            out.push(schema);
        }
    }
    out
}

/// Check a classified statement against the blocked schemas and the allowed
/// tables.
///
/// The blocked-schema pass covers every relation before any whitelist check,
/// so a catalog reference is always reported as `blocked_schema`. The first
/// relation (in traversal order) missing from a non-empty allow list is
/// reported as `unknown_table:<name>`. An empty allow list means no
/// restriction.
///
/// Allow-list entries may be bare (`items`) or qualified (`public.items`). A
/// bare entry admits the name in any non-blocked schema; a qualified entry
/// admits exactly that relation, plus the unqualified spelling of its name.
///
/// # Example
///
/// ```
/// use sql_approval_gate::{
///     query::{SqlDialect, classify},
///     whitelist::enforce
/// };
///
/// let stmt = classify("SELECT * FROM items", SqlDialect::Generic).unwrap();
/// assert!(enforce(&stmt, &["items"], &[] as &[&str]).is_ok());
/// ```
pub fn enforce<A, B>(
    statement: &SqlStatement,
    allowed_tables: &[A],
    blocked_schemas: &[B]
) -> Result<(), WhitelistRejection>
where
    A: AsRef<str>,
    B: AsRef<str>
{
    for table in &statement.tables {
        if let Some(schema) = &table.schema
            && is_blocked(schema, blocked_schemas)
        {
            warn!(table = %table, "reference to blocked schema");
            return Err(WhitelistRejection::BlockedSchema {
                schema: schema.as_str().to_lowercase()
            });
        }
    }

    if allowed_tables.is_empty() {
        return Ok(());
    }
    for table in &statement.tables {
        if !is_allowed(table, allowed_tables) {
            let name = table.qualified().to_lowercase();
            warn!(table = %name, "table outside whitelist");
            return Err(WhitelistRejection::UnknownTable {
                table: name
            });
        }
    }
    Ok(())
}

fn is_blocked<B: AsRef<str>>(schema: &str, blocked_schemas: &[B]) -> bool {
    SYSTEM_SCHEMAS
        .iter()
        .any(|s| s.eq_ignore_ascii_case(schema))
        || blocked_schemas
            .iter()
            .any(|s| s.as_ref().eq_ignore_ascii_case(schema))
}

fn is_allowed<A: AsRef<str>>(table: &TableRef, allowed_tables: &[A]) -> bool {
    allowed_tables.iter().any(|entry| {
        let entry = entry.as_ref().trim();
        match (entry.split_once('.'), &table.schema) {
            (None, _) => entry.eq_ignore_ascii_case(&table.name),
            (Some((schema, name)), Some(table_schema)) => {
                schema.eq_ignore_ascii_case(table_schema) && name.eq_ignore_ascii_case(&table.name)
            }
            (Some((_, name)), None) => name.eq_ignore_ascii_case(&table.name)
        }
    })
}
