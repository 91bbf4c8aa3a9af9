//! Core data models for schema metadata and search output.
//!
//! Rows are ordered JSON maps so that column declaration order survives from
//! the source all the way to person-key derivation and export.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// One result row: column name to scalar value, in column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Column metadata with name-based classification flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Type as the backend declares it, or the observed type for files
    pub declared_type: String,
    pub nullable: bool,
    /// Default expression, verbatim from the catalog
    pub default_value: Option<String>,
    /// Removed from every result row
    pub is_sensitive: bool,
    /// Matched by person searches and used to derive the person key
    pub is_person_identifier: bool,
}

/// Foreign key reference from one column to another table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    /// `None` when the catalog does not name the target column
    pub referenced_column: Option<String>,
}

/// Table metadata as reported by a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnMeta>,
    /// Approximate row count, if the backend reports one cheaply
    pub row_count_hint: Option<u64>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    /// Creates a table schema with no key information.
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnMeta>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
            row_count_hint: None,
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Person-identifier columns in declaration order, sensitive or not.
    ///
    /// Sensitive identifiers are still matched; they are removed from the
    /// output afterwards like every other sensitive column.
    pub fn person_identifier_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_person_identifier)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Columns classified as sensitive.
    pub fn sensitive_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_sensitive)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Table name to table schema for one connector.
///
/// Always replaced as a whole on refresh, never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaInfo {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaInfo {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one table.
    pub fn insert(&mut self, table: TableSchema) {
        self.tables.insert(table.table_name.clone(), table);
    }

    /// Looks up a table by exact name.
    pub fn get(&self, table_name: &str) -> Option<&TableSchema> {
        self.tables.get(table_name)
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl FromIterator<TableSchema> for SchemaInfo {
    fn from_iter<I: IntoIterator<Item = TableSchema>>(iter: I) -> Self {
        let mut schema = Self::new();
        for table in iter {
            schema.insert(table);
        }
        schema
    }
}

/// Ordered rows from one table, with the column list kept for exporters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableResult {
    /// Column names in result order
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl TableResult {
    /// Creates an empty result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a result with an explicit column list.
    ///
    /// Rows missing a column get a null for it so every row has the same
    /// shape.
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| {
                if row.len() == columns.len() && columns.iter().all(|c| row.contains_key(c)) {
                    return row;
                }
                let mut aligned = Row::new();
                for column in &columns {
                    let value = row.get(column).cloned().unwrap_or(JsonValue::Null);
                    aligned.insert(column.clone(), value);
                }
                aligned
            })
            .collect();
        Self { columns, rows }
    }

    /// Builds a result whose columns are the ordered union of row keys.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut seen = BTreeSet::new();
        let mut columns = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }
        Self::new(columns, rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Removes every column for which `drop` returns true.
    pub fn without_columns<F>(mut self, drop: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        let removed: Vec<String> = self
            .columns
            .iter()
            .filter(|c| drop(c))
            .cloned()
            .collect();
        if removed.is_empty() {
            return self;
        }
        self.columns.retain(|c| !drop(c));
        for row in &mut self.rows {
            for column in &removed {
                row.shift_remove(column);
            }
            // Stray keys not listed in `columns` are checked as well.
            row.retain(|key, _| !drop(key));
        }
        self
    }
}

/// Renders a scalar for substring matching and key derivation.
///
/// Nulls have no text; numbers and booleans use their JSON spelling.
pub fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Where in a source's lifecycle a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// The source id could not be resolved or built into a connector
    Resolve,
    /// Connecting to the source failed
    Connect,
    /// The search itself failed
    Search,
    /// The source exceeded its time budget
    Timeout,
}

/// A source that was dispatched but yielded nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source_name: String,
    /// Lifecycle step that failed
    pub stage: FailureStage,
    /// Error text; never carries credentials
    pub message: String,
    /// Whether the source could not be reached or timed out
    pub is_connection_error: bool,
}

/// Final state of a search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    /// Every dispatched source answered
    Complete,
    /// At least one source failed; results hold the remainder
    PartialFailure,
    /// There were no sources to search
    NoSources,
}

/// Aggregated output of a federated search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Source name → table name → redacted rows
    pub results: BTreeMap<String, BTreeMap<String, TableResult>>,
    /// Rows across every source and table
    pub total_records: usize,
    /// Sources that completed the whole lifecycle, even with zero matches
    pub sources_queried: BTreeSet<String>,
    /// Audit session this search was recorded under
    pub session_id: Option<String>,
    #[serde(default)]
    pub failures: Vec<SourceFailure>,
    pub status: SearchStatus,
}

impl SearchResult {
    /// Creates an empty result with the given status.
    pub fn empty(status: SearchStatus) -> Self {
        Self {
            results: BTreeMap::new(),
            total_records: 0,
            sources_queried: BTreeSet::new(),
            session_id: None,
            failures: Vec::new(),
            status,
        }
    }

    /// Records the tables returned by one source.
    ///
    /// The source counts as queried even when it matched nothing; only
    /// non-empty tables are kept.
    pub fn add_source(&mut self, source_name: &str, tables: BTreeMap<String, TableResult>) {
        self.sources_queried.insert(source_name.to_string());
        let tables: BTreeMap<String, TableResult> = tables
            .into_iter()
            .filter(|(_, result)| !result.is_empty())
            .collect();
        if tables.is_empty() {
            return;
        }
        self.total_records += tables.values().map(TableResult::len).sum::<usize>();
        self.results
            .entry(source_name.to_string())
            .or_default()
            .extend(tables);
    }

    /// Records a source that yielded nothing because it failed.
    pub fn add_failure(&mut self, failure: SourceFailure) {
        self.failures.push(failure);
    }

    /// Sum of row counts across every table of every source.
    pub fn count_rows(&self) -> usize {
        self.results
            .values()
            .flat_map(BTreeMap::values)
            .map(TableResult::len)
            .sum()
    }

    /// Flattens every row with `data_source` and `table` columns prepended.
    pub fn to_export_rows(&self) -> Vec<Row> {
        let mut out = Vec::with_capacity(self.total_records);
        for (source_name, tables) in &self.results {
            for (table_name, result) in tables {
                for row in &result.rows {
                    out.push(export_row(source_name, table_name, row));
                }
            }
        }
        out
    }
}

pub(crate) fn export_row(source_name: &str, table_name: &str, row: &Row) -> Row {
    let mut flat = Row::new();
    flat.insert(
        "data_source".to_string(),
        JsonValue::String(source_name.to_string()),
    );
    flat.insert("table".to_string(), JsonValue::String(table_name.to_string()));
    for (key, value) in row {
        flat.insert(key.clone(), value.clone());
    }
    flat
}
