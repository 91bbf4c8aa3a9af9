//! Statement building and row decoding for relational sources.

use super::SqlDialect;
use crate::Result;
use crate::connectors::ConnectionConfig;
use crate::error::RecordScoutError;
use crate::models::{Row as ResultRow, TableResult, TableSchema};
use serde_json::Value as JsonValue;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Column, Row};
use std::future::Future;

/// Keywords that write data or change the schema.
const WRITE_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "merge", "truncate", "drop", "alter", "create", "grant",
    "revoke", "copy", "call", "attach", "detach", "pragma", "vacuum",
];

/// Escape character used in generated `LIKE` predicates.
const LIKE_ESCAPE: char = '!';

/// Escapes `LIKE` wildcards so the identifier matches literally.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(ch);
    }
    escaped
}

/// Builds the case-insensitive substring search for one table.
///
/// Returns the statement and the number of times the pattern must be bound.
pub fn build_search_statement(
    dialect: SqlDialect,
    table: &TableSchema,
    columns: &[&str],
) -> (String, usize) {
    let predicates: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            format!(
                "LOWER(CAST({} AS {})) LIKE {} ESCAPE '{}'",
                dialect.quote_ident(column),
                dialect.text_type(),
                dialect.placeholder(i + 1),
                LIKE_ESCAPE
            )
        })
        .collect();

    let statement = format!(
        "SELECT {} FROM {} WHERE {}",
        select_list(dialect, table),
        dialect.quote_ident(&table.table_name),
        predicates.join(" OR ")
    );
    (statement, columns.len())
}

fn select_list(dialect: SqlDialect, table: &TableSchema) -> String {
    if table.columns.is_empty() {
        return "*".to_string();
    }
    table
        .columns
        .iter()
        .map(|column| dialect.projection(column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs the substring search for one table.
pub(crate) async fn search_table(
    pool: &AnyPool,
    dialect: SqlDialect,
    config: &ConnectionConfig,
    table: &TableSchema,
    columns: &[&str],
    identifier: &str,
) -> Result<TableResult> {
    let (statement, binds) = build_search_statement(dialect, table, columns);
    let pattern = format!("%{}%", escape_like(&dialect.fold_case(identifier)));
    tracing::trace!("Search statement for '{}': {}", table.table_name, statement);

    let mut query = sqlx::query(&statement);
    for _ in 0..binds {
        query = query.bind(pattern.clone());
    }

    let rows = with_timeout(config, &table.table_name, query.fetch_all(pool)).await?;
    Ok(rows_to_result(&rows, Some(table)))
}

/// Reads up to `limit` rows from a table.
pub(crate) async fn sample_table(
    pool: &AnyPool,
    dialect: SqlDialect,
    config: &ConnectionConfig,
    table: &TableSchema,
    limit: u32,
) -> Result<TableResult> {
    let statement = format!(
        "SELECT {} FROM {} LIMIT {}",
        select_list(dialect, table),
        dialect.quote_ident(&table.table_name),
        limit
    );
    let rows = with_timeout(
        config,
        &table.table_name,
        sqlx::query(&statement).fetch_all(pool),
    )
    .await?;
    Ok(rows_to_result(&rows, Some(table)))
}

/// Counts rows in a table.
pub(crate) async fn count_rows(
    pool: &AnyPool,
    dialect: SqlDialect,
    config: &ConnectionConfig,
    table: &str,
) -> Result<u64> {
    let statement = format!(
        "SELECT COUNT(*) AS row_count FROM {}",
        dialect.quote_ident(table)
    );
    let row = with_timeout(config, table, sqlx::query(&statement).fetch_one(pool)).await?;
    let count: i64 = row
        .try_get("row_count")
        .map_err(|e| RecordScoutError::query_failed(format!("Failed to parse row count: {}", e)))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Runs an ad-hoc statement after checking that it only reads.
pub(crate) async fn run_read_only_query(
    pool: &AnyPool,
    config: &ConnectionConfig,
    query: &str,
) -> Result<TableResult> {
    let statement = read_only_statement(query)?;
    let rows = with_timeout(config, "custom query", sqlx::query(statement).fetch_all(pool)).await?;
    Ok(rows_to_result(&rows, None))
}

/// Accepts a single `SELECT` or `WITH` statement, trailing `;` allowed.
///
/// Write keywords are rejected anywhere outside quotes, which catches
/// data-modifying CTEs. Connections are read-only as well; this check only
/// gives a clearer error.
///
/// # Errors
/// Returns a query error for empty input, multiple statements, any other
/// statement kind or a write keyword
pub fn read_only_statement(query: &str) -> Result<&str> {
    let statement = query.trim().trim_end_matches(';').trim_end();
    if statement.is_empty() {
        return Err(RecordScoutError::query_failed("query is empty"));
    }
    if statement.contains(';') {
        return Err(RecordScoutError::query_failed(
            "only a single statement is allowed",
        ));
    }
    let keyword: String = statement
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_lowercase();
    if keyword != "select" && keyword != "with" {
        return Err(RecordScoutError::query_failed(format!(
            "only SELECT or WITH queries are allowed, got '{}'",
            keyword
        )));
    }
    if let Some(word) = bare_words(statement)
        .into_iter()
        .find(|word| WRITE_KEYWORDS.contains(&word.as_str()))
    {
        return Err(RecordScoutError::query_failed(format!(
            "'{}' is not allowed in a read-only query",
            word
        )));
    }
    Ok(statement)
}

/// Lowercased words outside string literals and quoted identifiers.
fn bare_words(statement: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in statement.chars() {
        match quote {
            Some(open) => {
                if ch == open {
                    quote = None;
                }
            }
            None if ch.is_ascii_alphanumeric() || ch == '_' => {
                current.push(ch.to_ascii_lowercase());
            }
            None => {
                if matches!(ch, '\'' | '"' | '`') {
                    quote = Some(ch);
                }
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

async fn with_timeout<T, F>(config: &ConnectionConfig, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(config.query_timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(RecordScoutError::query_failed(format!(
            "Query on '{}' failed: {}",
            what, e
        ))),
        Err(_) => Err(RecordScoutError::timeout(
            format!("query on '{}'", what),
            config.query_timeout.as_secs(),
        )),
    }
}

/// Converts fetched rows, keeping the table's column order when no rows came
/// back.
fn rows_to_result(rows: &[AnyRow], table: Option<&TableSchema>) -> TableResult {
    let columns: Vec<String> = match (rows.first(), table) {
        (Some(row), _) => row.columns().iter().map(|c| c.name().to_string()).collect(),
        (None, Some(table)) => table.columns.iter().map(|c| c.name.clone()).collect(),
        (None, None) => Vec::new(),
    };
    let rows = rows.iter().map(row_to_json).collect();
    TableResult::new(columns, rows)
}

fn row_to_json(row: &AnyRow) -> ResultRow {
    let mut map = ResultRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), extract_column_value(row, index));
    }
    map
}

/// Extracts a column value as a JSON scalar.
///
/// Types are tried in order of likelihood since SQLite is dynamically typed.
fn extract_column_value(row: &AnyRow, index: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(JsonValue::String).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v
            .map(|n| JsonValue::Number(n.into()))
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map(JsonValue::Bool).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v
            .map(|bytes| JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(JsonValue::Null);
    }
    JsonValue::Null
}
