use sql_approval_gate::{
    connector::BackendKind,
    error::WhitelistRejection,
    query::{SqlDialect, classify},
    whitelist::{blocked_schemas, enforce}
};

fn blocked(backend: BackendKind) -> Vec<String> {
    blocked_schemas(backend, &[])
}

#[test]
fn test_allowed_table_passes() {
    let stmt = classify("SELECT * FROM items LIMIT 2", SqlDialect::Generic).unwrap();
    assert!(enforce(&stmt, &["items"], &blocked(BackendKind::Postgres)).is_ok());
}

#[test]
fn test_empty_allow_list_is_unrestricted() {
    let stmt = classify("SELECT * FROM anything", SqlDialect::Generic).unwrap();
    assert!(enforce(&stmt, &[] as &[&str], &blocked(BackendKind::Postgres)).is_ok());
}

#[test]
fn test_unknown_table_rejected() {
    let stmt = classify("SELECT * FROM nope", SqlDialect::Generic).unwrap();
    let err = enforce(&stmt, &["items"], &blocked(BackendKind::Postgres)).unwrap_err();
    assert_eq!(
        err,
        WhitelistRejection::UnknownTable {
            table: "nope".to_string()
        }
    );
    assert_eq!(err.to_string(), "unknown_table:nope");
}

#[test]
fn test_first_unknown_table_reported() {
    let stmt = classify(
        "SELECT * FROM items JOIN ghosts ON 1 = 1 JOIN phantoms ON 1 = 1",
        SqlDialect::Generic
    )
    .unwrap();
    let err = enforce(&stmt, &["items"], &blocked(BackendKind::Postgres)).unwrap_err();
    assert_eq!(err.to_string(), "unknown_table:ghosts");
}

#[test]
fn test_catalog_schema_blocked() {
    let stmt = classify("SELECT * FROM pg_catalog.pg_class", SqlDialect::PostgreSQL).unwrap();
    let err = enforce(&stmt, &[] as &[&str], &blocked(BackendKind::Postgres)).unwrap_err();
    assert!(matches!(err, WhitelistRejection::BlockedSchema { .. }));
    assert_eq!(err.to_string(), "blocked_schema");
}

#[test]
fn test_blocked_schema_reported_lowercase() {
    let stmt = classify("SELECT * FROM PG_Catalog.pg_class", SqlDialect::PostgreSQL).unwrap();
    let err = enforce(&stmt, &["items"], &blocked(BackendKind::Postgres)).unwrap_err();
    assert_eq!(
        err,
        WhitelistRejection::BlockedSchema {
            schema: "pg_catalog".to_string()
        }
    );
}

#[test]
fn test_blocked_schema_wins_over_allow_list() {
    let stmt = classify(
        "SELECT * FROM items, information_schema.tables",
        SqlDialect::Generic
    )
    .unwrap();
    let err = enforce(&stmt, &["items"], &blocked(BackendKind::MySql)).unwrap_err();
    assert!(matches!(err, WhitelistRejection::BlockedSchema { .. }));
}

#[test]
fn test_matching_is_case_insensitive() {
    let stmt = classify("SELECT * FROM Public.Items", SqlDialect::Generic).unwrap();
    assert!(enforce(&stmt, &["public.items"], &blocked(BackendKind::Postgres)).is_ok());
    assert!(enforce(&stmt, &["ITEMS"], &blocked(BackendKind::Postgres)).is_ok());
}

#[test]
fn test_configured_schema_blocked() {
    let stmt = classify("SELECT * FROM staging.items", SqlDialect::Generic).unwrap();
    let blocked = blocked_schemas(BackendKind::Postgres, &["Staging".to_string()]);
    assert!(enforce(&stmt, &[] as &[&str], &blocked).is_err());
}

#[test]
fn test_backend_catalogs() {
    assert!(blocked(BackendKind::MySql).contains(&"performance_schema".to_string()));
    assert!(blocked(BackendKind::Postgres).contains(&"pg_toast".to_string()));
    assert!(blocked(BackendKind::Snowflake).contains(&"information_schema".to_string()));
}

fn assert_rejected(sql: &str, expected: &str) {
    let stmt = classify(sql, SqlDialect::PostgreSQL).unwrap();
    let err = enforce(&stmt, &["items"], &blocked(BackendKind::Postgres)).unwrap_err();
    assert_eq!(err.to_string(), expected, "{}", sql);
}

#[test]
fn test_any_subquery_catalog_blocked() {
    assert_rejected(
        "SELECT id FROM items WHERE id = ANY(SELECT oid FROM pg_catalog.pg_authid)",
        "blocked_schema"
    );
}

#[test]
fn test_like_subquery_catalog_blocked() {
    assert_rejected(
        "SELECT id FROM items WHERE name LIKE (SELECT rolpassword FROM pg_catalog.pg_authid LIMIT 1)",
        "blocked_schema"
    );
}

#[test]
fn test_where_subquery_table_checked() {
    assert_rejected(
        "SELECT id FROM items WHERE EXISTS (SELECT 1 FROM secrets WHERE secrets.id = items.id)",
        "unknown_table:secrets"
    );
}

#[test]
fn test_order_by_subquery_table_checked() {
    assert_rejected(
        "SELECT id FROM items ORDER BY (SELECT count(*) FROM secrets)",
        "unknown_table:secrets"
    );
}

#[test]
fn test_group_by_subquery_table_checked() {
    assert_rejected(
        "SELECT id FROM items GROUP BY id, (SELECT 1 FROM secrets LIMIT 1)",
        "unknown_table:secrets"
    );
}

#[test]
fn test_is_true_subquery_table_checked() {
    assert_rejected(
        "SELECT id FROM items WHERE (SELECT flag FROM secrets LIMIT 1) IS TRUE",
        "unknown_table:secrets"
    );
}

#[test]
fn test_array_subquery_table_checked() {
    assert_rejected(
        "SELECT ARRAY(SELECT pw FROM secrets) FROM items",
        "unknown_table:secrets"
    );
}
