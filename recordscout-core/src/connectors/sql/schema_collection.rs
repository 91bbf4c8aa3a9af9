//! Live catalog introspection.
//!
//! Enumerating tables is the only step that fails the whole collection.
//! Column, key and row-estimate lookups that fail are logged and the table
//! is reported with what could be read, so one restricted table does not
//! hide the rest of the database.

use super::SqlDialect;
use crate::Result;
use crate::classifier::SchemaClassifier;
use crate::error::RecordScoutError;
use crate::models::{ColumnMeta, ForeignKey, SchemaInfo, TableSchema};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};

/// Collects and classifies every base table of the current schema.
pub(crate) async fn collect_schema(
    pool: &AnyPool,
    dialect: SqlDialect,
    classifier: &SchemaClassifier,
) -> Result<SchemaInfo> {
    let start_time = std::time::Instant::now();
    tracing::debug!("Enumerating {} tables", dialect);

    let table_names = list_tables(pool, dialect).await?;
    let mut schema = SchemaInfo::new();

    for table_name in table_names {
        let table = collect_table(pool, dialect, classifier, &table_name).await;
        classifier.log_review(&table);
        schema.insert(table);
    }

    tracing::info!(
        "Collected {} tables from {} in {:.2}s",
        schema.len(),
        dialect,
        start_time.elapsed().as_secs_f64()
    );
    Ok(schema)
}

/// Lists base table names.
pub(crate) async fn list_tables(pool: &AnyPool, dialect: SqlDialect) -> Result<Vec<String>> {
    let rows = sqlx::query(dialect.list_tables_sql())
        .fetch_all(pool)
        .await
        .map_err(|e| RecordScoutError::query_failed(format!("Failed to enumerate tables: {}", e)))?;

    rows.iter()
        .map(|row| {
            row.try_get::<String, _>("table_name").map_err(|e| {
                RecordScoutError::query_failed(format!("Failed to parse table name: {}", e))
            })
        })
        .collect()
}

async fn collect_table(
    pool: &AnyPool,
    dialect: SqlDialect,
    classifier: &SchemaClassifier,
    table_name: &str,
) -> TableSchema {
    let columns = match collect_columns(pool, dialect, classifier, table_name).await {
        Ok(columns) => columns,
        Err(e) => {
            tracing::warn!("Failed to collect columns for '{}': {}", table_name, e);
            Vec::new()
        }
    };

    let primary_keys = match collect_primary_keys(pool, dialect, table_name).await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!("Failed to collect primary key for '{}': {}", table_name, e);
            Vec::new()
        }
    };

    let foreign_keys = match collect_foreign_keys(pool, dialect, table_name).await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!("Failed to collect foreign keys for '{}': {}", table_name, e);
            Vec::new()
        }
    };

    let row_count_hint = match row_estimate(pool, dialect, table_name).await {
        Ok(hint) => hint,
        Err(e) => {
            tracing::debug!("No row estimate for '{}': {}", table_name, e);
            None
        }
    };

    tracing::debug!(
        "Table '{}': {} columns, {} primary key columns, {} foreign keys",
        table_name,
        columns.len(),
        primary_keys.len(),
        foreign_keys.len()
    );

    TableSchema {
        table_name: table_name.to_string(),
        columns,
        row_count_hint,
        primary_keys,
        foreign_keys,
    }
}

async fn collect_columns(
    pool: &AnyPool,
    dialect: SqlDialect,
    classifier: &SchemaClassifier,
    table_name: &str,
) -> Result<Vec<ColumnMeta>> {
    let rows = fetch_for_table(pool, dialect.columns_sql(), table_name).await?;

    rows.iter()
        .map(|row| {
            let name: String = text(row, "column_name")?.unwrap_or_default();
            let declared_type = text(row, "data_type")?.unwrap_or_default();
            let nullable = text(row, "is_nullable")?
                .map(|v| v.eq_ignore_ascii_case("yes"))
                .unwrap_or(true);
            let default_value = text(row, "column_default")?;
            Ok(classifier.column_meta(name, declared_type, nullable, default_value))
        })
        .collect()
}

async fn collect_primary_keys(
    pool: &AnyPool,
    dialect: SqlDialect,
    table_name: &str,
) -> Result<Vec<String>> {
    let rows = fetch_for_table(pool, dialect.primary_keys_sql(), table_name).await?;
    let mut keys = Vec::with_capacity(rows.len());
    for row in &rows {
        if let Some(name) = text(row, "column_name")? {
            keys.push(name);
        }
    }
    Ok(keys)
}

async fn collect_foreign_keys(
    pool: &AnyPool,
    dialect: SqlDialect,
    table_name: &str,
) -> Result<Vec<ForeignKey>> {
    let rows = fetch_for_table(pool, dialect.foreign_keys_sql(), table_name).await?;
    let mut keys = Vec::with_capacity(rows.len());
    for row in &rows {
        let (Some(column), Some(referenced_table)) =
            (text(row, "column_name")?, text(row, "referenced_table")?)
        else {
            continue;
        };
        keys.push(ForeignKey {
            column,
            referenced_table,
            referenced_column: text(row, "referenced_column")?,
        });
    }
    Ok(keys)
}

async fn row_estimate(pool: &AnyPool, dialect: SqlDialect, table_name: &str) -> Result<Option<u64>> {
    let Some(sql) = dialect.row_estimate_sql() else {
        return Ok(None);
    };
    let rows = fetch_for_table(pool, sql, table_name).await?;
    let estimate = match rows.first() {
        Some(row) => row
            .try_get::<Option<i64>, _>("estimate")
            .map_err(|e| RecordScoutError::query_failed(format!("Failed to parse estimate: {}", e)))?,
        None => None,
    };
    // Postgres reports -1 for tables that were never analyzed.
    Ok(estimate.and_then(|n| u64::try_from(n).ok()))
}

async fn fetch_for_table(pool: &AnyPool, sql: &str, table_name: &str) -> Result<Vec<AnyRow>> {
    sqlx::query(sql)
        .bind(table_name.to_string())
        .fetch_all(pool)
        .await
        .map_err(|e| {
            RecordScoutError::query_failed(format!(
                "Catalog query for table '{}' failed: {}",
                table_name, e
            ))
        })
}

fn text(row: &AnyRow, column: &str) -> Result<Option<String>> {
    row.try_get::<Option<String>, _>(column).map_err(|e| {
        RecordScoutError::query_failed(format!("Failed to parse catalog column '{}': {}", column, e))
    })
}
