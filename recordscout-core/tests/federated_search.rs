//! End-to-end federated search over file sources.
//!
//! This test suite covers:
//! - Partial failure when one of three sources is unreachable
//! - Redaction of every returned table
//! - Person grouping across sources and provenance reports
//! - Audit behaviour, including a failing audit sink

use async_trait::async_trait;
use recordscout_core::{
    AuditSink, KeywordConfig, MemoryAuditLog, MemoryDataSourceStore, RecordScoutError, Result,
    Row, SchemaClassifier, SearchEngine, SearchResult, SearchSessionRecord, SearchStatus,
    SourceDescriptor, TableResult,
    connectors::ConnectorFactory,
    group_by_person,
    models::FailureStage,
    store::DataSourceStore,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    engine: SearchEngine,
    store: Arc<MemoryDataSourceStore>,
    audit: Arc<MemoryAuditLog>,
}

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let crm = write(
        dir.path(),
        "crm.csv",
        "customer_id,full_name,email,phone\n\
         C100,Jane Doe,jane@x.com,555-0100\n\
         C200,Raj Patel,raj@x.com,555-0200\n",
    );
    let billing = write(
        dir.path(),
        "billing.json",
        r#"[
            {"customer_id": "C100", "amount": 12.5, "credit_card": "4111111111111111"},
            {"customer_id": "C300", "amount": 3, "credit_card": "4000000000000002"}
        ]"#,
    );

    let store = Arc::new(MemoryDataSourceStore::new());
    for descriptor in [
        SourceDescriptor::file("crm", crm),
        SourceDescriptor::file("billing", billing),
        SourceDescriptor::file("archive", dir.path().join("archive.xml")),
    ] {
        store
            .create_data_source(descriptor, None, "admin")
            .await
            .expect("register source");
    }

    let audit = Arc::new(MemoryAuditLog::new());
    let engine = SearchEngine::new(store.clone(), audit.clone(), ConnectorFactory::default());
    Fixture {
        _dir: dir,
        engine,
        store,
        audit,
    }
}

fn assert_fully_redacted(table: &TableResult, keywords: &KeywordConfig) {
    for column in table
        .columns
        .iter()
        .chain(table.rows.iter().flat_map(Row::keys))
    {
        let lower = column.to_lowercase();
        assert!(
            !keywords
                .sensitive_keywords
                .iter()
                .any(|k| lower.contains(k.as_str())),
            "column '{}' should have been redacted",
            column
        );
    }
}

/// Test that one unreachable source does not abort the others
#[tokio::test]
async fn test_partial_failure_keeps_other_sources() -> Result<()> {
    let fx = fixture().await;
    let result = fx.engine.global_search("c100", "analyst", None).await?;

    assert_eq!(result.status, SearchStatus::PartialFailure);
    assert_eq!(
        result.sources_queried.iter().collect::<Vec<_>>(),
        vec!["billing", "crm"]
    );
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].source_name, "archive");
    assert_eq!(result.failures[0].stage, FailureStage::Connect);
    assert!(result.failures[0].is_connection_error);

    assert_eq!(result.total_records, 2);
    assert_eq!(result.total_records, result.count_rows());
    assert!(result.session_id.is_some());
    Ok(())
}

/// Test that no returned table carries a sensitive column
#[tokio::test]
async fn test_results_are_redacted() -> Result<()> {
    let fx = fixture().await;
    let result = fx.engine.global_search("c", "analyst", None).await?;
    let keywords = KeywordConfig::default();

    let mut tables = 0;
    for source in result.results.values() {
        for table in source.values() {
            assert_fully_redacted(table, &keywords);
            tables += 1;
        }
    }
    assert_eq!(tables, 2);

    let crm = &result.results["crm"]["main_table"];
    assert_eq!(crm.columns, vec!["customer_id", "full_name"]);
    assert_eq!(crm.len(), 2);
    Ok(())
}

/// Test that redacting an already redacted table changes nothing
#[test]
fn test_redaction_is_idempotent() {
    let classifier = SchemaClassifier::default();
    let table = TableResult::from_rows(vec![
        json!({"customer_id": "C100", "SSN": "123-45-6789", "Home_Address": "1 Main St"})
            .as_object()
            .cloned()
            .unwrap_or_default(),
    ]);

    let once = classifier.redact(table, "customers");
    let twice = classifier.redact(once.clone(), "customers");
    assert_eq!(once, twice);
    assert_eq!(once.columns, vec!["customer_id"]);
}

/// Test that one person found in two sources forms one group
#[tokio::test]
async fn test_grouping_across_sources() -> Result<()> {
    let fx = fixture().await;
    let result = fx.engine.global_search("C100", "analyst", None).await?;

    let groups = group_by_person(&result, fx.engine.classifier());
    assert_eq!(groups.len(), 1);
    let records = &groups["c100"];
    assert_eq!(records.len(), 2);
    let sources: Vec<&str> = records.iter().map(|r| r.source_name.as_ref()).collect();
    assert_eq!(sources, vec!["billing", "crm"]);
    Ok(())
}

/// Test that rows without a person key are counted but not grouped
#[test]
fn test_unkeyed_rows_still_counted() {
    let mut result = SearchResult::empty(SearchStatus::Complete);
    let rows: Vec<Row> = [
        json!({"customer_id": "C100", "total": 5}),
        json!({"customer_id": "", "total": 7}),
        json!({"customer_id": null, "total": 9}),
    ]
    .into_iter()
    .filter_map(|v| v.as_object().cloned())
    .collect();
    result.add_source(
        "orders",
        [("orders".to_string(), TableResult::from_rows(rows))]
            .into_iter()
            .collect(),
    );

    let groups = group_by_person(&result, &SchemaClassifier::default());
    assert_eq!(result.total_records, 3);
    assert_eq!(groups.values().map(Vec::len).sum::<usize>(), 1);
}

/// Test the provenance report narrows to an exact key match
#[tokio::test]
async fn test_person_provenance() -> Result<()> {
    let fx = fixture().await;
    let report = fx.engine.get_person_provenance(" C100 ", "analyst").await?;

    assert_eq!(report.person_key, "c100");
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.data_sources, vec!["billing", "crm"]);

    let export = report.to_export_rows();
    assert_eq!(export.len(), 2);
    assert!(export.iter().all(|row| row.contains_key("data_source")));
    assert!(export.iter().all(|row| !row.contains_key("credit_card")));

    // "c1" is a substring of C100 but not its key
    let report = fx.engine.get_person_provenance("c1", "analyst").await?;
    assert!(report.records.is_empty());
    assert_eq!(report.total_records, 2);
    Ok(())
}

/// Test that searches are audited and reference their session
#[tokio::test]
async fn test_search_is_audited() -> Result<()> {
    let fx = fixture().await;
    let result = fx.engine.global_search("jane", "analyst", None).await?;

    let sessions = fx.audit.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(Some(&sessions[0].0), result.session_id.as_ref());
    assert_eq!(sessions[0].1.search_query, "jane");
    assert_eq!(sessions[0].1.results_count, 1);

    let events = fx.audit.events_for("global_search").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].user_id, "analyst");
    assert_eq!(events[0].details["failed_sources"], json!(["archive"]));
    assert_eq!(
        events[0].details["search_session_id"],
        json!(result.session_id)
    );
    Ok(())
}

/// Test that restricting the search to one source only touches that source
#[tokio::test]
async fn test_search_selected_sources() -> Result<()> {
    let fx = fixture().await;
    let ids: Vec<i64> = fx
        .store
        .get_all_data_sources()
        .await?
        .into_iter()
        .filter(|r| r.name() == "crm")
        .map(|r| r.id)
        .collect();

    let result = fx.engine.global_search("jane", "analyst", Some(ids.as_slice())).await?;
    assert_eq!(result.status, SearchStatus::Complete);
    assert_eq!(result.sources_queried.len(), 1);
    assert!(result.failures.is_empty());
    Ok(())
}

/// Test a single-source search and its audit record
#[tokio::test]
async fn test_search_by_data_source() -> Result<()> {
    let fx = fixture().await;
    let result = fx.engine.search_by_data_source(2, "C100", "analyst").await?;
    assert_eq!(result.data_source_name, "billing");
    assert_eq!(result.total_records, 1);
    assert!(!result.results["main_table"].columns.contains(&"credit_card".to_string()));

    let err = fx
        .engine
        .search_by_data_source(3, "C100", "analyst")
        .await
        .expect_err("archive file is missing");
    assert!(err.is_connection_error());

    assert_eq!(fx.audit.events_for("data_source_search").await.len(), 1);
    Ok(())
}

/// Test ad-hoc queries on a file source are redacted and audited
#[tokio::test]
async fn test_custom_query_on_file_source() -> Result<()> {
    let fx = fixture().await;
    let result = fx
        .engine
        .execute_custom_query(1, "SELECT * FROM main_table WHERE full_name LIKE 'raj%'", "analyst")
        .await?;
    assert_eq!(result.total_records, 1);
    assert_eq!(result.results.columns, vec!["customer_id", "full_name"]);

    let err = fx
        .engine
        .execute_custom_query(1, "DROP TABLE main_table", "analyst")
        .await
        .expect_err("not a select");
    assert!(matches!(err, RecordScoutError::QueryExecution { .. }));

    let events = fx.audit.events_for("custom_query").await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].details["results_count"], 1);
    assert!(events[1].details.contains_key("error"));
    Ok(())
}

/// Test source administration through the engine
#[tokio::test]
async fn test_create_and_refresh_data_source() -> Result<()> {
    let fx = fixture().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write(dir.path(), "hr.csv", "employee_name,salary\nJane Doe,100\n");

    let record = fx
        .engine
        .create_data_source(SourceDescriptor::file("hr", &path), "admin")
        .await?;
    let schema = record.schema_info.clone().expect("schema stored");
    let table = schema.get("main_table").expect("main table");
    assert!(table.columns[1].is_sensitive);

    write(dir.path(), "hr.csv", "employee_name,salary,badge_id\nJane Doe,100,7\n");
    let refreshed = fx.engine.refresh_schema(record.id, "admin").await?;
    let columns = refreshed
        .schema_info
        .as_ref()
        .and_then(|s| s.get("main_table"))
        .map(|t| t.columns.len());
    assert_eq!(columns, Some(3));

    let (ok, _) = fx.engine.test_data_source_connection(record.id).await;
    assert!(ok);

    let err = fx
        .engine
        .create_data_source(SourceDescriptor::file("gone", dir.path().join("gone.csv")), "admin")
        .await
        .expect_err("unreachable source");
    assert!(err.is_connection_error());
    assert_eq!(fx.engine.data_sources().await?.len(), 4);

    assert_eq!(fx.audit.events_for("create_data_source").await.len(), 1);
    assert_eq!(fx.audit.events_for("refresh_schema").await.len(), 1);
    Ok(())
}

/// Audit sink that rejects everything.
struct BrokenAudit;

#[async_trait]
impl AuditSink for BrokenAudit {
    async fn log_action(&self, _user_id: &str, _action: &str, _details: Row) -> Result<()> {
        Err(RecordScoutError::audit("sink offline"))
    }

    async fn create_search_session(&self, _session: SearchSessionRecord) -> Result<String> {
        Err(RecordScoutError::audit("sink offline"))
    }
}

/// Test that a failing audit sink does not fail the search
#[tokio::test]
async fn test_audit_failure_does_not_fail_search() -> Result<()> {
    let fx = fixture().await;
    let engine = SearchEngine::new(fx.store.clone(), Arc::new(BrokenAudit), ConnectorFactory::default());

    let result = engine.global_search("c100", "analyst", None).await?;
    assert_eq!(result.total_records, 2);
    assert!(result.session_id.is_none());
    Ok(())
}
