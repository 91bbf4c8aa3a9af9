//! Relational connector over PostgreSQL, MySQL and SQLite.
//!
//! # Module Structure
//! - `dialect`: Placeholders, quoting and catalog queries per backend
//! - `connection`: Pool creation through `sqlx::any`
//! - `schema_collection`: Tables, columns and keys from the live catalog
//! - `search`: Parameterized substring search, samples and ad-hoc queries
//!
//! # Security Guarantees
//! - Search values are bound as parameters, never interpolated
//! - Every pooled session is switched to read-only mode on connect
//! - Ad-hoc queries must be a single `SELECT` or `WITH` statement with no
//!   data-modifying keyword
//! - SQLite files are opened read-only
//! - Connection URLs are held in zeroizing buffers and never logged

pub mod connection;
pub mod dialect;
pub mod schema_collection;
pub mod search;

#[cfg(test)]
mod tests;

use super::{ConnectionConfig, Connector};
use crate::Result;
use crate::classifier::SchemaClassifier;
use crate::models::{SchemaInfo, TableResult, TableSchema};
use async_trait::async_trait;
use sqlx::AnyPool;
use std::sync::Arc;
use zeroize::Zeroizing;

pub use dialect::SqlDialect;

/// Connector for one relational database.
///
/// The pool exists only between `connect` and `disconnect`.
pub struct SqlConnector {
    name: String,
    dialect: SqlDialect,
    url: Zeroizing<String>,
    config: ConnectionConfig,
    classifier: Arc<SchemaClassifier>,
    pool: Option<AnyPool>,
    schema: Option<SchemaInfo>,
}

impl std::fmt::Debug for SqlConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlConnector")
            .field("name", &self.name)
            .field("dialect", &self.dialect)
            .field("target", &crate::security::safe_target(&self.url))
            .field("config", &self.config)
            .field("connected", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}

impl SqlConnector {
    /// Creates a disconnected connector.
    ///
    /// `url` must already carry the backend's scheme.
    pub fn new(
        name: impl Into<String>,
        dialect: SqlDialect,
        url: Zeroizing<String>,
        config: ConnectionConfig,
        classifier: Arc<SchemaClassifier>,
    ) -> Self {
        Self {
            name: name.into(),
            dialect,
            url,
            config,
            classifier,
            pool: None,
            schema: None,
        }
    }

    /// Backend this connector talks to.
    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn pool(&self) -> Result<&AnyPool> {
        self.pool.as_ref().ok_or_else(|| {
            crate::error::RecordScoutError::connection_refused(format!(
                "data source '{}' is not connected",
                self.name
            ))
        })
    }

    /// Reads up to `limit` redacted rows from a table.
    ///
    /// # Errors
    /// Returns error if not connected or the table cannot be read
    pub async fn table_sample(&mut self, table: &str, limit: u32) -> Result<TableResult> {
        let schema = self.table_schema(table).await?;
        let sample =
            search::sample_table(self.pool()?, self.dialect, &self.config, &schema, limit).await?;
        Ok(self.filter_sensitive_fields(sample, table))
    }

    /// Counts the rows of a table.
    ///
    /// # Errors
    /// Returns error if not connected or the count query fails
    pub async fn table_row_count(&self, table: &str) -> Result<u64> {
        search::count_rows(self.pool()?, self.dialect, &self.config, table).await
    }

    async fn table_schema(&mut self, table: &str) -> Result<TableSchema> {
        let schema = match &self.schema {
            Some(schema) => schema.clone(),
            None => self.try_describe_schema().await?,
        };
        schema
            .get(table)
            .cloned()
            .ok_or_else(|| crate::error::RecordScoutError::not_found(format!("table '{}'", table)))
    }
}

#[async_trait]
impl Connector for SqlConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn classifier(&self) -> &SchemaClassifier {
        &self.classifier
    }

    async fn connect(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }
        let pool = connection::create_pool(&self.url, self.dialect, &self.config).await?;
        tracing::info!(
            "Connected to '{}' ({})",
            self.name,
            crate::security::safe_target(&self.url)
        );
        self.pool = Some(pool);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            tracing::debug!("Disconnected from '{}'", self.name);
        }
    }

    fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    async fn try_describe_schema(&mut self) -> Result<SchemaInfo> {
        let schema =
            schema_collection::collect_schema(self.pool()?, self.dialect, &self.classifier).await?;
        self.schema = Some(schema.clone());
        Ok(schema)
    }

    fn cached_schema(&self) -> Option<&SchemaInfo> {
        self.schema.as_ref()
    }

    async fn try_execute_query(&self, query: &str) -> Result<TableResult> {
        search::run_read_only_query(self.pool()?, &self.config, query).await
    }

    async fn search_table(
        &self,
        table: &TableSchema,
        columns: &[&str],
        identifier: &str,
    ) -> Result<TableResult> {
        search::search_table(
            self.pool()?,
            self.dialect,
            &self.config,
            table,
            columns,
            identifier,
        )
        .await
    }
}
