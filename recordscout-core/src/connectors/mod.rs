//! Connector trait and implementations for uniform data source access.
//!
//! Every data source, relational or file-backed, is reached through the
//! object-safe [`Connector`] trait. The search algorithm shared by all
//! variants lives in the trait's provided methods; variants supply schema
//! introspection and a per-table match.
//!
//! # Module Structure
//! - `config`: Connection settings and source descriptors
//! - `factory`: Builds the right connector for a descriptor
//! - `sql`: Relational sources through `sqlx::any`
//! - `file`: CSV, JSON and XML files loaded into memory

use crate::Result;
use crate::classifier::SchemaClassifier;
use crate::error::RecordScoutError;
use crate::models::{SchemaInfo, TableResult, TableSchema};
use async_trait::async_trait;
use std::collections::BTreeMap;

pub mod config;
pub mod factory;
pub mod file;
pub mod sql;

pub use config::{ConnectionConfig, FileFormat, SourceDescriptor, SourceKind};
pub use factory::{ConnectorFactory, supported_types};
pub use file::FileConnector;
pub use sql::{SqlConnector, SqlDialect};

/// Table-name context used when redacting ad-hoc query output.
pub const CUSTOM_QUERY_CONTEXT: &str = "custom_query";

/// Capability contract every data source implements.
///
/// # Security Guarantees
/// - All operations are read-only
/// - Results leave a connector only after sensitive columns are removed
/// - Connection strings are sanitized in error messages and logs
///
/// # Object Safety
/// This trait is object-safe, allowing for dynamic dispatch through
/// `Box<dyn Connector>`.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Name of the data source, used as the key in search results.
    fn name(&self) -> &str;

    /// Classifier used for schema flags and redaction.
    fn classifier(&self) -> &SchemaClassifier;

    /// Establishes access to the source.
    ///
    /// # Errors
    /// Returns a connection error if the source is unreachable or
    /// misconfigured; the connector then stays disconnected
    async fn connect(&mut self) -> Result<()>;

    /// Releases resources. Safe to call when `connect` failed or never ran.
    async fn disconnect(&mut self);

    /// Whether `connect` succeeded and `disconnect` has not run since.
    fn is_connected(&self) -> bool;

    /// Introspects and classifies the source's tables.
    ///
    /// A successful call replaces the cached schema as a whole.
    ///
    /// # Errors
    /// Returns a connection error when not connected, or the introspection
    /// failure
    async fn try_describe_schema(&mut self) -> Result<SchemaInfo>;

    /// Introspects the source, logging failures instead of returning them.
    ///
    /// Returns an empty schema when not connected or when introspection
    /// fails.
    async fn describe_schema(&mut self) -> SchemaInfo {
        if !self.is_connected() {
            return SchemaInfo::new();
        }
        match self.try_describe_schema().await {
            Ok(schema) => schema,
            Err(e) => {
                tracing::warn!("Schema introspection of '{}' failed: {}", self.name(), e);
                SchemaInfo::new()
            }
        }
    }

    /// Last schema produced by `describe_schema`, if any.
    fn cached_schema(&self) -> Option<&SchemaInfo>;

    /// Runs a source-native query.
    ///
    /// # Errors
    /// Returns a query error for malformed, rejected or failing queries
    async fn try_execute_query(&self, query: &str) -> Result<TableResult>;

    /// Matches `identifier` against the given columns of one table.
    ///
    /// Returns unredacted rows; callers redact before results leave the
    /// connector.
    async fn search_table(
        &self,
        table: &TableSchema,
        columns: &[&str],
        identifier: &str,
    ) -> Result<TableResult>;

    /// Lists table names from the current schema.
    async fn list_tables(&mut self) -> Vec<String> {
        match self.cached_schema() {
            Some(schema) => schema.table_names(),
            None => self.describe_schema().await.table_names(),
        }
    }

    /// Runs a source-native query, logging failures instead of returning
    /// them so that one bad query cannot abort a multi-table scan.
    async fn execute_query(&self, query: &str) -> TableResult {
        match self.try_execute_query(query).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Query on '{}' failed: {}", self.name(), e);
                TableResult::empty()
            }
        }
    }

    /// Searches tables for rows matching a person identifier.
    ///
    /// Tables without a person-identifier column are skipped, and a table
    /// whose query fails is logged and skipped. Only non-empty, redacted
    /// results are returned.
    ///
    /// # Errors
    /// Returns a connection error if the connector is not connected, or the
    /// introspection error if the schema cannot be read
    async fn search_person_records(
        &mut self,
        identifier: &str,
        tables: Option<&[String]>,
    ) -> Result<BTreeMap<String, TableResult>> {
        if !self.is_connected() {
            return Err(RecordScoutError::connection_refused(format!(
                "data source '{}' is not connected",
                self.name()
            )));
        }

        let schema = match self.cached_schema() {
            Some(schema) => schema.clone(),
            None => self.try_describe_schema().await?,
        };

        let candidates: Vec<&TableSchema> = match tables {
            Some(names) => names
                .iter()
                .filter_map(|name| {
                    let table = schema.get(name);
                    if table.is_none() {
                        tracing::debug!("Table '{}' not found in '{}'", name, self.name());
                    }
                    table
                })
                .collect(),
            None => schema.tables().collect(),
        };

        let mut results = BTreeMap::new();
        for table in candidates {
            let columns = table.person_identifier_columns();
            if columns.is_empty() {
                tracing::debug!(
                    "Skipping table '{}': no person-identifier columns",
                    table.table_name
                );
                continue;
            }

            match self.search_table(table, &columns, identifier).await {
                Ok(found) if !found.is_empty() => {
                    tracing::debug!(
                        "Table '{}' in '{}' matched {} rows",
                        table.table_name,
                        self.name(),
                        found.len()
                    );
                    let redacted = self.filter_sensitive_fields(found, &table.table_name);
                    results.insert(table.table_name.clone(), redacted);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        "Search of table '{}' in '{}' failed: {}",
                        table.table_name,
                        self.name(),
                        e
                    );
                }
            }
        }

        Ok(results)
    }

    /// Removes every sensitive column for the given table context.
    fn filter_sensitive_fields(&self, result: TableResult, table_name: &str) -> TableResult {
        self.classifier().redact(result, table_name)
    }
}
