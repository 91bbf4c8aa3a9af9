//! Connector for CSV, JSON and XML files.
//!
//! The whole file is parsed once on `connect` and held read-only until
//! `disconnect`. Every connector loads its own copy; nothing is shared
//! between connectors for the same path.
//!
//! # Module Structure
//! - `loader`: Format-specific parsing into a table
//! - `query`: The `SELECT ... FROM main_table` sublanguage

pub mod loader;
pub mod query;


use super::{Connector, FileFormat};
use crate::Result;
use crate::classifier::SchemaClassifier;
use crate::error::RecordScoutError;
use crate::models::{Row, SchemaInfo, TableResult, TableSchema, scalar_text};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the single synthetic table a file source exposes.
pub const MAIN_TABLE: &str = "main_table";

/// Connector for one tabular file.
#[derive(Debug)]
pub struct FileConnector {
    name: String,
    path: PathBuf,
    format: FileFormat,
    classifier: Arc<SchemaClassifier>,
    data: Option<TableResult>,
    schema: Option<SchemaInfo>,
}

impl FileConnector {
    /// Creates a disconnected connector; nothing is read until `connect`.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        format: FileFormat,
        classifier: Arc<SchemaClassifier>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            format,
            classifier,
            data: None,
            schema: None,
        }
    }

    /// Location of the file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format the file is parsed as.
    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Number of loaded rows, if connected.
    pub fn row_count(&self) -> Option<usize> {
        self.data.as_ref().map(TableResult::len)
    }

    fn data(&self) -> Result<&TableResult> {
        self.data.as_ref().ok_or_else(|| {
            RecordScoutError::connection_refused(format!(
                "file source '{}' is not loaded",
                self.name
            ))
        })
    }

    fn build_schema(&self, data: &TableResult) -> SchemaInfo {
        let columns = data
            .columns
            .iter()
            .map(|column| {
                let nullable = data
                    .rows
                    .iter()
                    .any(|row| row.get(column).is_none_or(JsonValue::is_null));
                self.classifier.column_meta(
                    column.clone(),
                    loader::observed_type(&data.rows, column),
                    nullable,
                    None,
                )
            })
            .collect();

        let mut table = TableSchema::new(MAIN_TABLE, columns);
        table.row_count_hint = Some(data.len() as u64);
        self.classifier.log_review(&table);
        std::iter::once(table).collect()
    }
}

fn row_matches(row: &Row, columns: &[&str], needle: &str) -> bool {
    columns.iter().any(|column| {
        row.get(*column)
            .and_then(scalar_text)
            .is_some_and(|text| text.to_lowercase().contains(needle))
    })
}

#[async_trait]
impl Connector for FileConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn classifier(&self) -> &SchemaClassifier {
        &self.classifier
    }

    async fn connect(&mut self) -> Result<()> {
        if self.data.is_some() {
            return Ok(());
        }
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            RecordScoutError::connection_failed(
                format!("Failed to read file '{}'", self.path.display()),
                e,
            )
        })?;
        // Parsing is CPU-bound; keep it off the task driving the fan-out.
        let format = self.format;
        let data = tokio::task::spawn_blocking(move || loader::parse(&bytes, format))
            .await
            .map_err(|e| {
                RecordScoutError::connection_failed(
                    format!("Parsing '{}' did not complete", self.path.display()),
                    e,
                )
            })??;
        tracing::info!(
            "Loaded {} rows and {} columns from '{}' ({})",
            data.len(),
            data.columns.len(),
            self.path.display(),
            self.format
        );
        self.data = Some(data);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.data.take().is_some() {
            tracing::debug!("Released file source '{}'", self.name);
        }
        self.schema = None;
    }

    fn is_connected(&self) -> bool {
        self.data.is_some()
    }

    async fn try_describe_schema(&mut self) -> Result<SchemaInfo> {
        let schema = self.build_schema(self.data()?);
        self.schema = Some(schema.clone());
        Ok(schema)
    }

    fn cached_schema(&self) -> Option<&SchemaInfo> {
        self.schema.as_ref()
    }

    async fn try_execute_query(&self, query: &str) -> Result<TableResult> {
        let data = self.data()?;
        let parsed = query::parse(query)?;
        query::execute(&parsed, MAIN_TABLE, data)
    }

    async fn search_table(
        &self,
        table: &TableSchema,
        columns: &[&str],
        identifier: &str,
    ) -> Result<TableResult> {
        if table.table_name != MAIN_TABLE {
            return Err(RecordScoutError::query_failed(format!(
                "unknown table '{}'",
                table.table_name
            )));
        }
        let data = self.data()?;
        let needle = identifier.to_lowercase();
        let rows = data
            .rows
            .iter()
            .filter(|row| row_matches(row, columns, &needle))
            .cloned()
            .collect();
        Ok(TableResult::new(data.columns.clone(), rows))
    }
}
