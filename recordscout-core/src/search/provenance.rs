//! Person-centric grouping of search results.
//!
//! Keys are recomputed from each row's own column names rather than from a
//! stored schema, because ad-hoc query output need not match any schema.

use crate::classifier::SchemaClassifier;
use crate::models::{Row, SearchResult, export_row};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// One row that justified a person's inclusion in a search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvenanceRecord<'a> {
    pub source_name: Cow<'a, str>,
    pub table_name: Cow<'a, str>,
    pub row: Cow<'a, Row>,
    pub person_key: String,
}

impl ProvenanceRecord<'_> {
    /// Detaches the record from the search result it borrows from.
    pub fn into_owned(self) -> ProvenanceRecord<'static> {
        ProvenanceRecord {
            source_name: Cow::Owned(self.source_name.into_owned()),
            table_name: Cow::Owned(self.table_name.into_owned()),
            row: Cow::Owned(self.row.into_owned()),
            person_key: self.person_key,
        }
    }
}

/// Normalizes free text the way person keys are normalized.
pub fn normalize_key(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Groups every keyed row of a search result by person key.
///
/// Rows without a non-empty person-identifier value are left out; they stay
/// in the search result and in its `total_records`. Groups list records in
/// source, table and row order.
pub fn group_by_person<'a>(
    result: &'a SearchResult,
    classifier: &SchemaClassifier,
) -> BTreeMap<String, Vec<ProvenanceRecord<'a>>> {
    let mut groups: BTreeMap<String, Vec<ProvenanceRecord<'a>>> = BTreeMap::new();
    let mut unkeyed = 0usize;

    for (source_name, tables) in &result.results {
        for (table_name, table) in tables {
            for row in &table.rows {
                let Some(person_key) = classifier.person_key(row) else {
                    unkeyed += 1;
                    continue;
                };
                groups
                    .entry(person_key.clone())
                    .or_default()
                    .push(ProvenanceRecord {
                        source_name: Cow::Borrowed(source_name),
                        table_name: Cow::Borrowed(table_name),
                        row: Cow::Borrowed(row),
                        person_key,
                    });
            }
        }
    }

    if unkeyed > 0 {
        tracing::debug!("{} rows had no person key and were not grouped", unkeyed);
    }
    groups
}

/// Every record found for one person.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvenanceReport {
    /// Identifier as given by the caller
    pub person_identifier: String,
    /// Normalized key the records were matched on
    pub person_key: String,
    /// Rows returned by the underlying search, keyed or not
    pub total_records: usize,
    /// Sources the underlying search reached
    pub data_sources: Vec<String>,
    pub records: Vec<ProvenanceRecord<'static>>,
}

impl ProvenanceReport {
    /// Builds the report for one identifier from a finished search.
    ///
    /// Only records whose key equals the normalized identifier are kept;
    /// the broad substring search narrows to an exact key match here.
    pub fn from_search(
        person_identifier: &str,
        result: &SearchResult,
        classifier: &SchemaClassifier,
    ) -> Self {
        let person_key = normalize_key(person_identifier);
        let records = group_by_person(result, classifier)
            .remove(&person_key)
            .unwrap_or_default()
            .into_iter()
            .map(ProvenanceRecord::into_owned)
            .collect();

        Self {
            person_identifier: person_identifier.to_string(),
            person_key,
            total_records: result.total_records,
            data_sources: result.sources_queried.iter().cloned().collect(),
            records,
        }
    }

    /// Flattens the records with `data_source` and `table` columns prepended.
    pub fn to_export_rows(&self) -> Vec<Row> {
        self.records
            .iter()
            .map(|r| export_row(&r.source_name, &r.table_name, &r.row))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SearchStatus, TableResult};
    use serde_json::json;

    fn rows(values: Vec<serde_json::Value>) -> TableResult {
        TableResult::from_rows(
            values
                .into_iter()
                .filter_map(|v| v.as_object().cloned())
                .collect(),
        )
    }

    fn sample_result() -> SearchResult {
        let mut result = SearchResult::empty(SearchStatus::Complete);
        result.add_source(
            "crm",
            [(
                "customers".to_string(),
                rows(vec![
                    json!({"customer_id": "C100", "full_name": "Jane Doe"}),
                    json!({"customer_id": "  ", "full_name": "Raj Patel"}),
                ]),
            )]
            .into_iter()
            .collect(),
        );
        result.add_source(
            "billing",
            [(
                "invoices".to_string(),
                rows(vec![
                    json!({"customer_id": "c100 ", "amount": 12}),
                    json!({"amount": 99, "memo": "walk-in"}),
                ]),
            )]
            .into_iter()
            .collect(),
        );
        result
    }

    #[test]
    fn test_groups_same_key_across_sources() {
        let result = sample_result();
        let classifier = SchemaClassifier::default();
        let groups = group_by_person(&result, &classifier);

        let c100 = &groups["c100"];
        assert_eq!(c100.len(), 2);
        let sources: Vec<&str> = c100.iter().map(|r| r.source_name.as_ref()).collect();
        assert_eq!(sources, vec!["billing", "crm"]);

        // blank customer_id falls through to full_name
        assert!(groups.contains_key("raj patel"));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_unkeyed_rows_are_counted_but_not_grouped() {
        let result = sample_result();
        let groups = group_by_person(&result, &SchemaClassifier::default());

        let grouped: usize = groups.values().map(Vec::len).sum();
        assert_eq!(grouped, 3);
        assert_eq!(result.total_records, 4);
    }

    #[test]
    fn test_report_uses_exact_key_match() {
        let result = sample_result();
        let classifier = SchemaClassifier::default();

        let report = ProvenanceReport::from_search(" C100", &result, &classifier);
        assert_eq!(report.person_key, "c100");
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.total_records, 4);
        assert_eq!(report.data_sources, vec!["billing", "crm"]);

        let export = report.to_export_rows();
        assert_eq!(export[0]["data_source"], "billing");
        assert_eq!(export[0]["table"], "invoices");
        assert_eq!(export[1]["full_name"], "Jane Doe");

        let report = ProvenanceReport::from_search("C1", &result, &classifier);
        assert!(report.records.is_empty());
    }
}
