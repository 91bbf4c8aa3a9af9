//! Name-based column classification and redaction.
//!
//! Classification is a heuristic over column names only; values are never
//! inspected. Over-redaction is acceptable, leaking a sensitive column is not,
//! so every match is a plain substring test against the lowercased name.

use crate::config::KeywordConfig;
use crate::models::{ColumnMeta, Row, TableResult, TableSchema, scalar_text};
use crate::Result;
use std::fmt;

/// Classification flags for one column name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub is_sensitive: bool,
    pub is_person_identifier: bool,
}

/// Advisory finding about a classified table. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationWarning {
    /// Column looks like a person identifier but will be redacted
    SensitiveIdentifier { table: String, column: String },
    /// No column is flagged as a person identifier
    NoPersonIdentifier { table: String },
    /// Every column of the table is redacted
    FullyRedacted { table: String },
}

impl fmt::Display for ClassificationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SensitiveIdentifier { table, column } => write!(
                f,
                "column '{}.{}' matches both identifier and sensitive keywords; it is searched but redacted from results",
                table, column
            ),
            Self::NoPersonIdentifier { table } => {
                write!(f, "table '{}' has no person-identifier column", table)
            }
            Self::FullyRedacted { table } => {
                write!(f, "every column of table '{}' is redacted", table)
            }
        }
    }
}

/// Classifies column names against configurable keyword sets.
///
/// # Example
/// ```rust
/// use recordscout_core::classifier::SchemaClassifier;
///
/// let classifier = SchemaClassifier::default();
/// let ssn = classifier.classify("SSN");
/// assert!(ssn.is_sensitive);
/// assert!(!ssn.is_person_identifier);
///
/// let customer = classifier.classify("customer_id");
/// assert!(customer.is_person_identifier);
/// assert!(!customer.is_sensitive);
/// ```
#[derive(Debug, Clone)]
pub struct SchemaClassifier {
    keywords: KeywordConfig,
}

impl Default for SchemaClassifier {
    fn default() -> Self {
        Self {
            keywords: KeywordConfig::default().normalized(),
        }
    }
}

impl SchemaClassifier {
    /// Creates a classifier from validated keyword sets.
    ///
    /// # Errors
    /// Returns error if the keyword configuration is invalid
    pub fn new(keywords: &KeywordConfig) -> Result<Self> {
        keywords.validate()?;
        Ok(Self {
            keywords: keywords.normalized(),
        })
    }

    /// The normalized keyword sets in force.
    pub fn keywords(&self) -> &KeywordConfig {
        &self.keywords
    }

    /// Classifies one column name.
    pub fn classify(&self, column_name: &str) -> Classification {
        let lower = column_name.to_lowercase();
        Classification {
            is_sensitive: contains_any(&lower, &self.keywords.sensitive_keywords),
            is_person_identifier: contains_any(&lower, &self.keywords.person_identifier_keywords),
        }
    }

    /// Whether the column is redacted in the given table context.
    pub fn is_sensitive_in(&self, column_name: &str, table_name: &str) -> bool {
        let lower = column_name.to_lowercase();
        if contains_any(&lower, &self.keywords.sensitive_keywords) {
            return true;
        }
        self.keywords
            .table_sensitive_keywords
            .get(&table_name.to_lowercase())
            .is_some_and(|extra| contains_any(&lower, extra))
    }

    /// Builds column metadata with classification flags filled in.
    pub fn column_meta(
        &self,
        name: impl Into<String>,
        declared_type: impl Into<String>,
        nullable: bool,
        default_value: Option<String>,
    ) -> ColumnMeta {
        let name = name.into();
        let flags = self.classify(&name);
        ColumnMeta {
            name,
            declared_type: declared_type.into(),
            nullable,
            default_value,
            is_sensitive: flags.is_sensitive,
            is_person_identifier: flags.is_person_identifier,
        }
    }

    /// Collects advisory findings for a classified table.
    pub fn review_table(&self, table: &TableSchema) -> Vec<ClassificationWarning> {
        let mut warnings = Vec::new();
        for column in &table.columns {
            if column.is_sensitive && column.is_person_identifier {
                warnings.push(ClassificationWarning::SensitiveIdentifier {
                    table: table.table_name.clone(),
                    column: column.name.clone(),
                });
            }
        }
        if table.person_identifier_columns().is_empty() {
            warnings.push(ClassificationWarning::NoPersonIdentifier {
                table: table.table_name.clone(),
            });
        }
        if !table.columns.is_empty()
            && table
                .columns
                .iter()
                .all(|c| self.is_sensitive_in(&c.name, &table.table_name))
        {
            warnings.push(ClassificationWarning::FullyRedacted {
                table: table.table_name.clone(),
            });
        }
        warnings
    }

    /// Logs advisory findings for a table.
    pub fn log_review(&self, table: &TableSchema) {
        for warning in self.review_table(table) {
            match warning {
                ClassificationWarning::NoPersonIdentifier { .. } => {
                    tracing::debug!("{}", warning);
                }
                _ => tracing::warn!("{}", warning),
            }
        }
    }

    /// Removes every sensitive column for the given table context.
    ///
    /// Applying it twice yields the same result as applying it once.
    pub fn redact(&self, result: TableResult, table_name: &str) -> TableResult {
        if result.columns.is_empty() && result.rows.is_empty() {
            return result;
        }
        result.without_columns(|column| self.is_sensitive_in(column, table_name))
    }

    /// Person-identifier columns of a row that are not themselves redacted,
    /// in row order.
    pub fn row_identifier_columns<'a>(&self, row: &'a Row) -> Vec<&'a str> {
        row.keys()
            .map(String::as_str)
            .filter(|column| {
                let flags = self.classify(column);
                flags.is_person_identifier && !flags.is_sensitive
            })
            .collect()
    }

    /// Derives the person key of a row.
    ///
    /// The key is the first non-empty trimmed value among the row's
    /// person-identifier columns, lowercased. Rows without one have no key.
    pub fn person_key(&self, row: &Row) -> Option<String> {
        self.row_identifier_columns(row)
            .into_iter()
            .filter_map(|column| row.get(column).and_then(scalar_text))
            .map(|text| text.trim().to_lowercase())
            .find(|key| !key.is_empty())
    }
}

fn contains_any(haystack: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| haystack.contains(k.as_str()))
}
