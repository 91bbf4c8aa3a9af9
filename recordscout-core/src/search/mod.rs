//! Federated search over every configured data source.
//!
//! [`SearchEngine`] is the entry point for callers that have already
//! authenticated a user. Each operation builds fresh connectors from the
//! store's descriptors and tears them down before returning; no connector
//! outlives the call that created it.
//!
//! # Module Structure
//! - `fanout`: Bounded concurrent per-source search with timeouts
//! - `provenance`: Grouping of rows by derived person key
//!
//! # Failure Containment
//! A source that cannot be built, reached or searched is recorded in the
//! result's `failures` and never aborts the others. Only a failing store or
//! a blank identifier fails a global search outright. Audit failures are
//! logged and otherwise ignored.

pub mod fanout;
pub mod provenance;

pub use fanout::{SearchPhase, SourceOutcome};
pub use provenance::{ProvenanceRecord, ProvenanceReport, group_by_person, normalize_key};

use crate::Result;
use crate::audit::{AuditSink, SearchSessionRecord};
use crate::classifier::SchemaClassifier;
use crate::config::{EngineConfig, SearchConfig};
use crate::connectors::{CUSTOM_QUERY_CONTEXT, ConnectorFactory, SourceDescriptor};
use crate::error::RecordScoutError;
use crate::models::{
    FailureStage, Row, SchemaInfo, SearchResult, SearchStatus, SourceFailure, TableResult,
};
use crate::store::{DataSourceId, DataSourceRecord, DataSourceStore};
use chrono::Utc;
use fanout::{SearchPhase as Phase, enter};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Result of searching a single data source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSearchResult {
    pub data_source_name: String,
    /// Table name → redacted matching rows
    pub results: BTreeMap<String, TableResult>,
    pub total_records: usize,
}

/// Result of an ad-hoc query against one data source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomQueryResult {
    pub data_source_name: String,
    /// Redacted query output
    pub results: TableResult,
    pub total_records: usize,
}

/// Orchestrates searches, ad-hoc queries and source administration.
pub struct SearchEngine {
    store: Arc<dyn DataSourceStore>,
    audit: Arc<dyn AuditSink>,
    factory: ConnectorFactory,
    config: SearchConfig,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("factory", &self.factory)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn details(value: JsonValue) -> Row {
    match value {
        JsonValue::Object(map) => map,
        _ => Row::new(),
    }
}

impl SearchEngine {
    /// Creates an engine with default search limits.
    pub fn new(
        store: Arc<dyn DataSourceStore>,
        audit: Arc<dyn AuditSink>,
        factory: ConnectorFactory,
    ) -> Self {
        Self {
            store,
            audit,
            factory,
            config: SearchConfig::default(),
        }
    }

    /// Creates an engine whose classifier and limits come from `config`.
    ///
    /// # Errors
    /// Returns a configuration error if `config` does not validate
    pub fn from_config(
        store: Arc<dyn DataSourceStore>,
        audit: Arc<dyn AuditSink>,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let classifier = Arc::new(SchemaClassifier::new(&config.keywords)?);
        let factory = ConnectorFactory::new(classifier);
        Ok(Self::new(store, audit, factory).with_search_config(config.search.clone()))
    }

    /// Builder method to set search limits; connector settings follow them.
    pub fn with_search_config(mut self, config: SearchConfig) -> Self {
        self.factory = self.factory.with_config(config.connection_config());
        self.config = config;
        self
    }

    pub fn factory(&self) -> &ConnectorFactory {
        &self.factory
    }

    pub fn classifier(&self) -> &SchemaClassifier {
        self.factory.classifier()
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.config
    }

    /// Searches every active source, or the given ones, for an identifier.
    ///
    /// Unknown or inactive ids are reported as `resolve` failures. The
    /// result carries a search-session id when the audit sink provided one.
    ///
    /// # Errors
    /// Returns an error only if the identifier is blank or the store fails;
    /// per-source problems end up in `failures`
    pub async fn global_search(
        &self,
        identifier: &str,
        user_id: &str,
        source_ids: Option<&[DataSourceId]>,
    ) -> Result<SearchResult> {
        enter(Phase::Idle, identifier.len());
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(RecordScoutError::configuration(
                "search identifier cannot be blank",
            ));
        }

        let (records, unresolved) = self.resolve_sources(source_ids).await?;
        if records.is_empty() && unresolved.is_empty() {
            tracing::info!("No active data sources to search");
            let result = SearchResult::empty(SearchStatus::NoSources);
            self.log_search(user_id, identifier, &result).await;
            return Ok(result);
        }

        let descriptors: Vec<SourceDescriptor> =
            records.into_iter().map(|r| r.descriptor).collect();
        let mut result = fanout::fan_out(
            &self.factory,
            &descriptors,
            identifier,
            self.config.max_concurrency,
            self.config.source_timeout(),
        )
        .await;
        for failure in unresolved {
            result.add_failure(failure);
        }

        if result.failures.is_empty() {
            result.status = SearchStatus::Complete;
            enter(Phase::Complete, identifier.len());
        } else {
            result.status = SearchStatus::PartialFailure;
            enter(Phase::PartialFailure, identifier.len());
        }
        tracing::info!(
            "Search found {} records in {} of {} sources",
            result.total_records,
            result.sources_queried.len(),
            result.sources_queried.len() + result.failures.len()
        );

        let session = SearchSessionRecord {
            user_id: user_id.to_string(),
            search_query: identifier.to_string(),
            results_count: result.total_records,
            data_sources_queried: result.sources_queried.iter().cloned().collect(),
            created_at: Utc::now(),
        };
        match self.audit.create_search_session(session).await {
            Ok(session_id) => result.session_id = Some(session_id),
            Err(e) => tracing::warn!("Could not create search session: {}", e),
        }
        self.log_search(user_id, identifier, &result).await;

        Ok(result)
    }

    /// Searches a single source.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown id, and the source's own error if it
    /// cannot be built, reached or searched within the time budget
    pub async fn search_by_data_source(
        &self,
        source_id: DataSourceId,
        identifier: &str,
        user_id: &str,
    ) -> Result<SourceSearchResult> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(RecordScoutError::configuration(
                "search identifier cannot be blank",
            ));
        }
        let record = self.require_source(source_id).await?;
        let mut connector = self.factory.create_connector(&record.descriptor)?;

        let budget = self.config.source_timeout();
        let search = async {
            connector.connect().await?;
            connector.search_person_records(identifier, None).await
        };
        let outcome = match tokio::time::timeout(budget, search).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RecordScoutError::timeout(
                format!("search of '{}'", record.name()),
                budget.as_secs(),
            )),
        };
        connector.disconnect().await;
        let results = outcome?;

        let total_records = results.values().map(TableResult::len).sum();
        self.log_action(
            user_id,
            "data_source_search",
            json!({
                "data_source_id": source_id,
                "data_source_name": record.name(),
                "identifier": identifier,
                "results_count": total_records,
            }),
        )
        .await;

        Ok(SourceSearchResult {
            data_source_name: record.name().to_string(),
            results,
            total_records,
        })
    }

    /// Runs a source-native query and redacts its output.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown id, a connection error if the source
    /// cannot be reached, and `QueryExecution` for a rejected or failing query
    pub async fn execute_custom_query(
        &self,
        source_id: DataSourceId,
        query: &str,
        user_id: &str,
    ) -> Result<CustomQueryResult> {
        let record = self.require_source(source_id).await?;
        let mut connector = self.factory.create_connector(&record.descriptor)?;

        let outcome = match connector.connect().await {
            Ok(()) => connector.try_execute_query(query).await,
            Err(e) => Err(e),
        };
        connector.disconnect().await;

        let outcome =
            outcome.map(|result| connector.filter_sensitive_fields(result, CUSTOM_QUERY_CONTEXT));
        let mut audit = json!({
            "data_source_id": source_id,
            "data_source_name": record.name(),
            "query": query,
        });
        match &outcome {
            Ok(result) => audit["results_count"] = json!(result.len()),
            Err(e) => audit["error"] = json!(e.to_string()),
        }
        self.log_action(user_id, "custom_query", audit).await;

        let results = outcome?;
        Ok(CustomQueryResult {
            data_source_name: record.name().to_string(),
            total_records: results.len(),
            results,
        })
    }

    /// Finds every record whose person key equals the given identifier.
    ///
    /// # Errors
    /// Fails only when the underlying global search fails
    pub async fn get_person_provenance(
        &self,
        person_identifier: &str,
        user_id: &str,
    ) -> Result<ProvenanceReport> {
        let result = self.global_search(person_identifier, user_id, None).await?;
        let report = ProvenanceReport::from_search(person_identifier, &result, self.classifier());
        tracing::info!(
            "Provenance for key '{}' has {} records from {} searched sources",
            report.person_key,
            report.records.len(),
            report.data_sources.len()
        );
        Ok(report)
    }

    /// Tests, introspects and stores a new data source.
    ///
    /// # Errors
    /// Returns the factory's error for an unbuildable descriptor, a
    /// connection error if the source cannot be reached, and the store's
    /// error if saving fails
    pub async fn create_data_source(
        &self,
        descriptor: SourceDescriptor,
        user_id: &str,
    ) -> Result<DataSourceRecord> {
        let schema = self.introspect(&descriptor).await?;
        let record = self
            .store
            .create_data_source(descriptor, Some(schema), user_id)
            .await?;

        self.log_action(
            user_id,
            "create_data_source",
            json!({
                "data_source_id": record.id,
                "data_source_name": record.name(),
                "data_source_type": record.descriptor.kind.to_string(),
                "tables": record.schema_info.as_ref().map_or(0, SchemaInfo::len),
            }),
        )
        .await;
        tracing::info!("Created data source '{}' (id {})", record.name(), record.id);
        Ok(record)
    }

    /// Re-introspects a source and replaces its stored schema.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown id and the source's error if it
    /// cannot be reached; the stored schema is then left untouched
    pub async fn refresh_schema(
        &self,
        source_id: DataSourceId,
        user_id: &str,
    ) -> Result<DataSourceRecord> {
        let record = self.require_source(source_id).await?;
        let schema = self.introspect(&record.descriptor).await?;
        let updated = self.store.update_schema(source_id, schema).await?;

        self.log_action(
            user_id,
            "refresh_schema",
            json!({
                "data_source_id": source_id,
                "data_source_name": updated.name(),
                "tables": updated.schema_info.as_ref().map_or(0, SchemaInfo::len),
            }),
        )
        .await;
        Ok(updated)
    }

    /// Tests connectivity of a stored source. Never fails.
    pub async fn test_data_source_connection(&self, source_id: DataSourceId) -> (bool, String) {
        match self.store.get_data_source_by_id(source_id).await {
            Ok(Some(record)) => self.factory.test_connection(&record.descriptor).await,
            Ok(None) => (false, format!("data source {} not found", source_id)),
            Err(e) => (false, e.to_string()),
        }
    }

    /// Lists active sources.
    ///
    /// # Errors
    /// Returns the store's error
    pub async fn data_sources(&self) -> Result<Vec<DataSourceRecord>> {
        self.store.get_all_data_sources().await
    }

    async fn require_source(&self, source_id: DataSourceId) -> Result<DataSourceRecord> {
        self.store
            .get_data_source_by_id(source_id)
            .await?
            .ok_or_else(|| RecordScoutError::not_found(format!("data source {}", source_id)))
    }

    async fn resolve_sources(
        &self,
        source_ids: Option<&[DataSourceId]>,
    ) -> Result<(Vec<DataSourceRecord>, Vec<SourceFailure>)> {
        let Some(ids) = source_ids else {
            return Ok((self.store.get_all_data_sources().await?, Vec::new()));
        };

        let mut records = Vec::new();
        let mut unresolved = Vec::new();
        let unique: BTreeSet<DataSourceId> = ids.iter().copied().collect();
        for id in unique {
            match self.store.get_data_source_by_id(id).await? {
                Some(record) if record.is_active => records.push(record),
                Some(record) => unresolved.push(SourceFailure {
                    source_name: record.name().to_string(),
                    stage: FailureStage::Resolve,
                    message: format!("data source {} is inactive", id),
                    is_connection_error: false,
                }),
                None => unresolved.push(SourceFailure {
                    source_name: format!("#{}", id),
                    stage: FailureStage::Resolve,
                    message: format!("data source {} not found", id),
                    is_connection_error: false,
                }),
            }
        }
        Ok((records, unresolved))
    }

    async fn introspect(&self, descriptor: &SourceDescriptor) -> Result<SchemaInfo> {
        let mut connector = self.factory.create_connector(descriptor)?;
        let schema = match connector.connect().await {
            Ok(()) => connector.try_describe_schema().await,
            Err(e) => Err(e),
        };
        connector.disconnect().await;
        schema
    }

    async fn log_search(&self, user_id: &str, identifier: &str, result: &SearchResult) {
        let failed: Vec<&str> = result
            .failures
            .iter()
            .map(|f| f.source_name.as_str())
            .collect();
        self.log_action(
            user_id,
            "global_search",
            json!({
                "identifier": identifier,
                "results_count": result.total_records,
                "data_sources_queried": result.sources_queried,
                "failed_sources": failed,
                "status": result.status,
                "search_session_id": result.session_id,
            }),
        )
        .await;
    }

    async fn log_action(&self, user_id: &str, action: &str, value: JsonValue) {
        if let Err(e) = self.audit.log_action(user_id, action, details(value)).await {
            tracing::warn!("Could not record '{}' audit event: {}", action, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::store::MemoryDataSourceStore;

    fn engine() -> (SearchEngine, Arc<MemoryDataSourceStore>, Arc<MemoryAuditLog>) {
        let store = Arc::new(MemoryDataSourceStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let engine = SearchEngine::new(store.clone(), audit.clone(), ConnectorFactory::default());
        (engine, store, audit)
    }

    #[tokio::test]
    async fn test_no_sources_signal() {
        let (engine, _, audit) = engine();
        let result = engine.global_search("jane", "analyst", None).await.expect("search");

        assert_eq!(result.status, SearchStatus::NoSources);
        assert_eq!(result.total_records, 0);
        assert!(result.session_id.is_none());
        assert_eq!(audit.events_for("global_search").await.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_identifier_is_rejected() {
        let (engine, _, _) = engine();
        let err = engine
            .global_search("   ", "analyst", None)
            .await
            .expect_err("blank");
        assert!(matches!(err, RecordScoutError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_resolve_failures() {
        let (engine, _, _) = engine();
        let result = engine
            .global_search("jane", "analyst", Some(&[7, 7][..]))
            .await
            .expect("search");

        assert_eq!(result.status, SearchStatus::PartialFailure);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, FailureStage::Resolve);
        assert!(result.sources_queried.is_empty());
    }

    #[tokio::test]
    async fn test_single_source_operations_report_not_found() {
        let (engine, _, audit) = engine();

        let err = engine
            .search_by_data_source(3, "jane", "analyst")
            .await
            .expect_err("unknown id");
        assert!(matches!(err, RecordScoutError::NotFound { .. }));

        let err = engine
            .execute_custom_query(3, "SELECT * FROM main_table", "analyst")
            .await
            .expect_err("unknown id");
        assert!(matches!(err, RecordScoutError::NotFound { .. }));

        let err = engine.refresh_schema(3, "analyst").await.expect_err("unknown id");
        assert!(matches!(err, RecordScoutError::NotFound { .. }));

        let (ok, message) = engine.test_data_source_connection(3).await;
        assert!(!ok);
        assert!(message.contains("not found"));
        assert!(audit.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_from_config_applies_limits() {
        let store = Arc::new(MemoryDataSourceStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let mut config = EngineConfig::default();
        config.search = config.search.with_max_concurrency(2);
        config.keywords = config.keywords.with_sensitive_keywords(vec!["DOB".to_string()]);

        let engine = SearchEngine::from_config(store, audit, &config).expect("engine");
        assert_eq!(engine.search_config().max_concurrency, 2);
        assert!(engine.classifier().classify("patient_dob").is_sensitive);
        assert!(!engine.classifier().classify("ssn").is_sensitive);

        config.search.source_timeout_secs = 0;
        let store = Arc::new(MemoryDataSourceStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        assert!(SearchEngine::from_config(store, audit, &config).is_err());
    }
}
