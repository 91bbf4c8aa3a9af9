//! Concurrent per-source search with failure containment.

use crate::Result;
use crate::connectors::{Connector, ConnectorFactory, SourceDescriptor};
use crate::error::RecordScoutError;
use crate::models::{FailureStage, SearchResult, SearchStatus, SourceFailure, TableResult};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Stages of a global search, traced as they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    FanOut,
    Aggregating,
    Complete,
    PartialFailure,
}

impl fmt::Display for SearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::FanOut => "fan_out",
            Self::Aggregating => "aggregating",
            Self::Complete => "complete",
            Self::PartialFailure => "partial_failure",
        };
        f.write_str(name)
    }
}

pub(crate) fn enter(phase: SearchPhase, identifier_len: usize) {
    tracing::debug!(phase = %phase, identifier_len, "search phase");
}

/// Tables found in one source, or why the source yielded nothing.
pub type SourceOutcome = std::result::Result<BTreeMap<String, TableResult>, SourceFailure>;

fn failure(source_name: &str, stage: FailureStage, error: &RecordScoutError) -> SourceFailure {
    SourceFailure {
        source_name: source_name.to_string(),
        stage,
        message: error.to_string(),
        is_connection_error: error.is_connection_error(),
    }
}

/// Runs connect, search and disconnect for one connector.
///
/// The connector is disconnected on every path that reaches this function's
/// end.
pub(crate) async fn run_lifecycle(
    connector: &mut dyn Connector,
    identifier: &str,
) -> SourceOutcome {
    let name = connector.name().to_string();

    if let Err(e) = connector.connect().await {
        connector.disconnect().await;
        return Err(failure(&name, FailureStage::Connect, &e));
    }

    let outcome = connector.search_person_records(identifier, None).await;
    connector.disconnect().await;
    outcome.map_err(|e| failure(&name, FailureStage::Search, &e))
}

/// Searches one source under a time budget.
///
/// When the budget runs out the in-flight lifecycle is dropped, which closes
/// the connector's pool or releases its loaded file.
pub async fn search_source(
    factory: &ConnectorFactory,
    descriptor: &SourceDescriptor,
    identifier: &str,
    budget: Duration,
) -> SourceOutcome {
    search_with(
        &|d: &SourceDescriptor| factory.create_connector(d),
        descriptor,
        identifier,
        budget,
    )
    .await
}

async fn search_with<B>(
    build: &B,
    descriptor: &SourceDescriptor,
    identifier: &str,
    budget: Duration,
) -> SourceOutcome
where
    B: Fn(&SourceDescriptor) -> Result<Box<dyn Connector>> + Sync,
{
    let mut connector =
        build(descriptor).map_err(|e| failure(&descriptor.name, FailureStage::Resolve, &e))?;

    match tokio::time::timeout(budget, run_lifecycle(connector.as_mut(), identifier)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            let error = RecordScoutError::timeout(
                format!("search of '{}'", descriptor.name),
                budget.as_secs(),
            );
            Err(failure(&descriptor.name, FailureStage::Timeout, &error))
        }
    }
}

/// Fans a search out to every descriptor and aggregates the answers.
///
/// At most `max_concurrency` sources run at once. Results are merged by the
/// single consumer of the stream. Failed sources are recorded in
/// `failures` and left out of `sources_queried`.
pub async fn fan_out(
    factory: &ConnectorFactory,
    descriptors: &[SourceDescriptor],
    identifier: &str,
    max_concurrency: usize,
    budget: Duration,
) -> SearchResult {
    fan_out_with(
        &|d: &SourceDescriptor| factory.create_connector(d),
        descriptors,
        identifier,
        max_concurrency,
        budget,
    )
    .await
}

async fn fan_out_with<B>(
    build: &B,
    descriptors: &[SourceDescriptor],
    identifier: &str,
    max_concurrency: usize,
    budget: Duration,
) -> SearchResult
where
    B: Fn(&SourceDescriptor) -> Result<Box<dyn Connector>> + Sync,
{
    let mut result = SearchResult::empty(SearchStatus::Complete);
    if descriptors.is_empty() {
        return result;
    }

    let workers = descriptors.len().min(max_concurrency).max(1);
    enter(SearchPhase::FanOut, identifier.len());
    tracing::info!(
        "Searching {} sources with {} workers",
        descriptors.len(),
        workers
    );

    let searches = descriptors.iter().map(|descriptor| async move {
        let start = Instant::now();
        let outcome = search_with(build, descriptor, identifier, budget).await;
        (descriptor.name.as_str(), outcome, start.elapsed())
    });
    let mut stream = stream::iter(searches).buffer_unordered(workers);

    enter(SearchPhase::Aggregating, identifier.len());
    while let Some((name, outcome, elapsed)) = stream.next().await {
        match outcome {
            Ok(tables) => {
                tracing::info!(
                    "Source '{}' answered in {}ms with {} matching tables",
                    name,
                    elapsed.as_millis(),
                    tables.len()
                );
                result.add_source(name, tables);
            }
            Err(failure) => {
                tracing::warn!(
                    "Source '{}' yielded nothing ({:?}): {}",
                    name,
                    failure.stage,
                    failure.message
                );
                result.add_failure(failure);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::SchemaClassifier;
    use crate::models::{SchemaInfo, TableSchema};
    use async_trait::async_trait;

    /// Connector whose connect never finishes.
    #[derive(Debug, Default)]
    struct StalledConnector {
        classifier: SchemaClassifier,
    }

    #[async_trait]
    impl Connector for StalledConnector {
        fn name(&self) -> &str {
            "stalled"
        }

        fn classifier(&self) -> &SchemaClassifier {
            &self.classifier
        }

        async fn connect(&mut self) -> crate::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn disconnect(&mut self) {}

        fn is_connected(&self) -> bool {
            false
        }

        async fn try_describe_schema(&mut self) -> crate::Result<SchemaInfo> {
            Ok(SchemaInfo::new())
        }

        fn cached_schema(&self) -> Option<&SchemaInfo> {
            None
        }

        async fn try_execute_query(&self, _query: &str) -> crate::Result<TableResult> {
            Ok(TableResult::empty())
        }

        async fn search_table(
            &self,
            _table: &TableSchema,
            _columns: &[&str],
            _identifier: &str,
        ) -> crate::Result<TableResult> {
            Ok(TableResult::empty())
        }
    }

    /// Connector that answers immediately with one matching row.
    #[derive(Debug, Default)]
    struct ReadyConnector {
        classifier: SchemaClassifier,
        connected: bool,
    }

    #[async_trait]
    impl Connector for ReadyConnector {
        fn name(&self) -> &str {
            "ready"
        }

        fn classifier(&self) -> &SchemaClassifier {
            &self.classifier
        }

        async fn connect(&mut self) -> crate::Result<()> {
            self.connected = true;
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn try_describe_schema(&mut self) -> crate::Result<SchemaInfo> {
            let column = self.classifier.column_meta("full_name", "TEXT", false, None);
            Ok(std::iter::once(TableSchema::new("people", vec![column])).collect())
        }

        fn cached_schema(&self) -> Option<&SchemaInfo> {
            None
        }

        async fn try_execute_query(&self, _query: &str) -> crate::Result<TableResult> {
            Ok(TableResult::empty())
        }

        async fn search_table(
            &self,
            _table: &TableSchema,
            _columns: &[&str],
            _identifier: &str,
        ) -> crate::Result<TableResult> {
            let row = serde_json::json!({"full_name": "Jane Doe"});
            Ok(TableResult::from_rows(
                row.as_object().cloned().into_iter().collect(),
            ))
        }
    }

    fn build_test_connector(descriptor: &SourceDescriptor) -> crate::Result<Box<dyn Connector>> {
        match descriptor.name.as_str() {
            "stalled" => Ok(Box::new(StalledConnector::default())),
            _ => Ok(Box::new(ReadyConnector::default())),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_source_is_excluded() {
        let descriptors = [
            SourceDescriptor::file("stalled", "/unused/stalled.csv"),
            SourceDescriptor::file("ready", "/unused/ready.csv"),
        ];

        let result = fan_out_with(
            &build_test_connector,
            &descriptors,
            "jane",
            4,
            Duration::from_secs(2),
        )
        .await;

        assert_eq!(
            result.sources_queried.iter().collect::<Vec<_>>(),
            vec!["ready"]
        );
        assert_eq!(result.total_records, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].source_name, "stalled");
        assert_eq!(result.failures[0].stage, FailureStage::Timeout);
        assert!(result.failures[0].is_connection_error);
        assert!(!result.results.contains_key("stalled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_lifecycle_times_out() {
        let mut connector = StalledConnector::default();
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            run_lifecycle(&mut connector, "jane"),
        )
        .await;
        assert!(outcome.is_err(), "lifecycle should still be pending");
    }

    #[tokio::test]
    async fn test_connect_failure_is_recorded() {
        let mut connector = crate::connectors::FileConnector::new(
            "missing",
            "/nonexistent/people.csv",
            crate::connectors::FileFormat::Csv,
            std::sync::Arc::new(SchemaClassifier::default()),
        );
        let failure = run_lifecycle(&mut connector, "jane")
            .await
            .expect_err("missing file");
        assert_eq!(failure.stage, FailureStage::Connect);
        assert!(failure.is_connection_error);
        assert_eq!(failure.source_name, "missing");
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_unbuildable_descriptor_is_resolve_failure() {
        let factory = ConnectorFactory::default();
        let descriptor = SourceDescriptor::relational("legacy", "db2");
        let failure = search_source(&factory, &descriptor, "jane", Duration::from_secs(1))
            .await
            .expect_err("unknown driver");
        assert_eq!(failure.stage, FailureStage::Resolve);
        assert!(!failure.is_connection_error);
    }

    #[tokio::test]
    async fn test_fan_out_with_no_sources() {
        let result = fan_out(
            &ConnectorFactory::default(),
            &[],
            "jane",
            4,
            Duration::from_secs(1),
        )
        .await;
        assert!(result.sources_queried.is_empty());
        assert_eq!(result.total_records, 0);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(SearchPhase::FanOut.to_string(), "fan_out");
        assert_eq!(SearchPhase::PartialFailure.to_string(), "partial_failure");
    }
}
