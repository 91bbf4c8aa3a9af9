//! SQL connector tests against file-backed SQLite databases.

#![cfg(feature = "sqlite")]

use super::*;
use crate::error::RecordScoutError;
use crate::security::build_sqlite_url;
use sqlx::any::AnyPoolOptions;
use std::path::{Path, PathBuf};

async fn create_fixture(dir: &Path) -> PathBuf {
    connection::install_drivers();
    let path = dir.join("crm.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .expect("create fixture database");

    for statement in [
        "CREATE TABLE customers (
            customer_id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            ssn TEXT,
            email TEXT,
            loyalty_points INTEGER DEFAULT 0
        )",
        "CREATE TABLE orders (
            order_no INTEGER PRIMARY KEY,
            customer_id TEXT REFERENCES customers(customer_id),
            total REAL
        )",
        "CREATE TABLE audit_trail (event TEXT, happened TEXT)",
        "INSERT INTO customers VALUES ('C100', 'Jane Doe', '123-45-6789', 'j@x.com', 10)",
        "INSERT INTO customers VALUES ('C200', 'Raj Patel', '987-65-4321', 'r@x.com', NULL)",
        "INSERT INTO customers VALUES ('C300', '100% Real_Name', NULL, NULL, 3)",
        "INSERT INTO orders VALUES (1, 'C100', 19.5)",
        "INSERT INTO orders VALUES (2, 'C200', 5.25)",
        "INSERT INTO audit_trail VALUES ('jane logged in', '2024-01-01')",
    ] {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .expect("fixture statement");
    }
    pool.close().await;
    path
}

fn connector(path: &Path) -> SqlConnector {
    SqlConnector::new(
        "crm",
        SqlDialect::Sqlite,
        build_sqlite_url(&path.to_string_lossy(), true),
        ConnectionConfig::default(),
        Arc::new(SchemaClassifier::default()),
    )
}

#[tokio::test]
async fn test_describe_schema_classifies_columns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = create_fixture(dir.path()).await;
    let mut conn = connector(&path);

    assert!(conn.describe_schema().await.is_empty(), "not connected yet");

    conn.connect().await.expect("connect");
    let schema = conn.describe_schema().await;
    assert_eq!(schema.table_names(), vec!["audit_trail", "customers", "orders"]);

    let customers = schema.get("customers").expect("customers");
    let names: Vec<&str> = customers.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["customer_id", "full_name", "ssn", "email", "loyalty_points"]
    );
    assert_eq!(customers.primary_keys, vec!["customer_id"]);
    assert!(!customers.columns[1].nullable);
    assert!(customers.columns[2].is_sensitive);
    assert_eq!(customers.columns[4].default_value.as_deref(), Some("0"));
    assert_eq!(
        customers.person_identifier_columns(),
        vec!["customer_id", "full_name"]
    );

    let orders = schema.get("orders").expect("orders");
    assert_eq!(orders.foreign_keys.len(), 1);
    assert_eq!(orders.foreign_keys[0].referenced_table, "customers");
    assert_eq!(
        orders.foreign_keys[0].referenced_column.as_deref(),
        Some("customer_id")
    );

    assert_eq!(conn.cached_schema(), Some(&schema));
    conn.disconnect().await;
}

#[tokio::test]
async fn test_search_person_records_redacts_and_skips_tables() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = create_fixture(dir.path()).await;
    let mut conn = connector(&path);
    conn.connect().await.expect("connect");

    let results = conn
        .search_person_records("JANE", None)
        .await
        .expect("search");

    // audit_trail mentions jane but has no identifier column
    assert_eq!(results.keys().collect::<Vec<_>>(), vec!["customers"]);
    let customers = &results["customers"];
    assert_eq!(customers.len(), 1);
    let row = &customers.rows[0];
    assert_eq!(row["full_name"], "Jane Doe");
    assert_eq!(row["loyalty_points"], 10);
    assert!(!row.contains_key("ssn"));
    assert!(!row.contains_key("email"));
    assert!(!customers.columns.iter().any(|c| c == "ssn" || c == "email"));

    let results = conn
        .search_person_records("c100", Some(&["orders".to_string()]))
        .await
        .expect("search");
    assert_eq!(results["orders"].len(), 1);
    assert_eq!(results["orders"].rows[0]["total"], 19.5);

    conn.disconnect().await;
}

#[tokio::test]
async fn test_search_treats_wildcards_literally() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = create_fixture(dir.path()).await;
    let mut conn = connector(&path);
    conn.connect().await.expect("connect");

    let results = conn
        .search_person_records("100%", Some(&["customers".to_string()]))
        .await
        .expect("search");
    assert_eq!(results["customers"].len(), 1);
    assert_eq!(results["customers"].rows[0]["customer_id"], "C300");

    let results = conn
        .search_person_records("_", Some(&["customers".to_string()]))
        .await
        .expect("search");
    assert_eq!(results["customers"].len(), 1);

    conn.disconnect().await;
}

#[tokio::test]
async fn test_execute_query_is_read_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = create_fixture(dir.path()).await;
    let mut conn = connector(&path);
    conn.connect().await.expect("connect");

    let result = conn
        .execute_query("SELECT customer_id, full_name FROM customers ORDER BY customer_id")
        .await;
    assert_eq!(result.columns, vec!["customer_id", "full_name"]);
    assert_eq!(result.len(), 3);

    assert!(conn.execute_query("DELETE FROM customers").await.is_empty());
    let err = conn
        .try_execute_query("DELETE FROM customers")
        .await
        .expect_err("writes are rejected");
    assert!(matches!(err, RecordScoutError::QueryExecution { .. }));

    let err = conn
        .try_execute_query("SELECT * FROM missing_table")
        .await
        .expect_err("unknown table");
    assert!(matches!(err, RecordScoutError::QueryExecution { .. }));

    assert_eq!(conn.table_row_count("customers").await.expect("count"), 3);
    conn.disconnect().await;
}

#[tokio::test]
async fn test_table_sample_is_redacted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = create_fixture(dir.path()).await;
    let mut conn = connector(&path);
    conn.connect().await.expect("connect");

    let sample = conn.table_sample("customers", 2).await.expect("sample");
    assert_eq!(sample.len(), 2);
    assert!(!sample.columns.iter().any(|c| c == "ssn"));

    let err = conn.table_sample("nope", 2).await.expect_err("missing table");
    assert!(matches!(err, RecordScoutError::NotFound { .. }));
    conn.disconnect().await;
}

#[tokio::test]
async fn test_disconnected_connector_behaviour() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = create_fixture(dir.path()).await;
    let mut conn = connector(&path);

    conn.disconnect().await;
    assert!(!conn.is_connected());

    let err = conn
        .search_person_records("jane", None)
        .await
        .expect_err("not connected");
    assert!(err.is_connection_error());

    conn.connect().await.expect("connect");
    assert!(conn.is_connected());
    conn.disconnect().await;
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_connect_to_missing_file_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut conn = connector(&dir.path().join("missing.db"));

    let err = conn.connect().await.expect_err("missing database");
    assert!(err.is_connection_error());
    assert!(!conn.is_connected());
    assert!(conn.describe_schema().await.is_empty());
}

#[tokio::test]
async fn test_unreadable_database_fails_search() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("garbage.db");
    std::fs::write(&path, vec![0x5a_u8; 4096]).expect("write garbage");
    let mut conn = connector(&path);

    match conn.connect().await {
        Err(e) => assert!(e.is_connection_error()),
        Ok(()) => {
            let outcome = conn.search_person_records("jane", None).await;
            assert!(outcome.is_err(), "introspection failure must not look like zero matches");
            assert!(conn.try_describe_schema().await.is_err());
            assert!(conn.describe_schema().await.is_empty());
        }
    }
    conn.disconnect().await;
}

#[tokio::test]
async fn test_search_folds_case_like_sqlite_lower() {
    connection::install_drivers();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("accents.db");
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .expect("create database");
    for statement in [
        "CREATE TABLE people (full_name TEXT)",
        "INSERT INTO people VALUES ('JOSÉ Núñez')",
    ] {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .expect("fixture statement");
    }
    pool.close().await;

    let mut conn = connector(&path);
    conn.connect().await.expect("connect");
    for term in ["JOSÉ", "josÉ", "Núñez"] {
        let results = conn.search_person_records(term, None).await.expect("search");
        assert_eq!(results["people"].len(), 1, "term {:?}", term);
    }
    conn.disconnect().await;
}
