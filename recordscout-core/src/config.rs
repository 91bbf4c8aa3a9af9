//! Engine configuration.
//!
//! Keyword sets and search limits vary by deployment and compliance regime,
//! so they load from a JSON file instead of being compiled in. Every section
//! falls back to its defaults when absent.

use crate::connectors::ConnectionConfig;
use crate::error::RecordScoutError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Keyword sets used by the schema classifier.
///
/// Matching is a case-insensitive substring test against column names.
///
/// # Example
/// ```rust
/// use recordscout_core::config::KeywordConfig;
///
/// let config = KeywordConfig::default()
///     .with_table_keywords("employees", vec!["dob".to_string()]);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    /// Column-name fragments that mark a column for redaction
    pub sensitive_keywords: Vec<String>,
    /// Column-name fragments that mark a column as a person identifier
    pub person_identifier_keywords: Vec<String>,
    /// Extra sensitive fragments that apply only to the named table
    pub table_sensitive_keywords: BTreeMap<String, Vec<String>>,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| (*s).to_string()).collect();
        Self {
            sensitive_keywords: words(&[
                "password",
                "ssn",
                "credit_card",
                "phone",
                "email",
                "address",
                "salary",
                "medical_record",
                "bank_account",
            ]),
            person_identifier_keywords: words(&[
                "name", "first", "last", "full", "person", "user", "customer", "client", "id",
            ]),
            table_sensitive_keywords: BTreeMap::new(),
        }
    }
}

impl KeywordConfig {
    /// Adds table-specific sensitive keywords.
    pub fn with_table_keywords(mut self, table: impl Into<String>, keywords: Vec<String>) -> Self {
        self.table_sensitive_keywords.insert(table.into(), keywords);
        self
    }

    /// Replaces the global sensitive keyword set.
    pub fn with_sensitive_keywords(mut self, keywords: Vec<String>) -> Self {
        self.sensitive_keywords = keywords;
        self
    }

    /// Replaces the person-identifier keyword set.
    pub fn with_person_identifier_keywords(mut self, keywords: Vec<String>) -> Self {
        self.person_identifier_keywords = keywords;
        self
    }

    /// Validates keyword sets.
    ///
    /// # Errors
    /// Returns error if a global set is empty or any keyword is blank
    pub fn validate(&self) -> Result<()> {
        if self.sensitive_keywords.is_empty() {
            return Err(RecordScoutError::configuration(
                "sensitive_keywords cannot be empty",
            ));
        }
        if self.person_identifier_keywords.is_empty() {
            return Err(RecordScoutError::configuration(
                "person_identifier_keywords cannot be empty",
            ));
        }

        let blank = |list: &[String]| list.iter().any(|k| k.trim().is_empty());
        if blank(&self.sensitive_keywords) || blank(&self.person_identifier_keywords) {
            return Err(RecordScoutError::configuration("keywords cannot be blank"));
        }
        for (table, keywords) in &self.table_sensitive_keywords {
            if blank(keywords) {
                return Err(RecordScoutError::configuration(format!(
                    "keywords for table '{}' cannot be blank",
                    table
                )));
            }
        }

        Ok(())
    }

    /// Returns a copy with every keyword and table name trimmed and lowercased.
    pub fn normalized(&self) -> Self {
        let lower = |list: &[String]| -> Vec<String> {
            let mut out: Vec<String> = Vec::with_capacity(list.len());
            for keyword in list {
                let keyword = keyword.trim().to_lowercase();
                if !out.contains(&keyword) {
                    out.push(keyword);
                }
            }
            out
        };
        Self {
            sensitive_keywords: lower(&self.sensitive_keywords),
            person_identifier_keywords: lower(&self.person_identifier_keywords),
            table_sensitive_keywords: self
                .table_sensitive_keywords
                .iter()
                .map(|(table, keywords)| (table.trim().to_lowercase(), lower(keywords)))
                .collect(),
        }
    }
}

/// Limits for the federated search fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum number of sources searched at once
    pub max_concurrency: usize,
    /// Budget for one source's whole connect/search/disconnect cycle
    pub source_timeout_secs: u64,
    /// Connection timeout passed to relational connectors
    pub connect_timeout_secs: u64,
    /// Per-statement timeout passed to relational connectors
    pub query_timeout_secs: u64,
    /// Pool size per relational connector
    pub max_connections: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            source_timeout_secs: 30,
            connect_timeout_secs: 10,
            query_timeout_secs: 30,
            max_connections: 2,
        }
    }
}

impl SearchConfig {
    /// Sets the maximum concurrency for the fan-out.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Sets the per-source time budget.
    pub fn with_source_timeout_secs(mut self, secs: u64) -> Self {
        self.source_timeout_secs = secs;
        self
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    /// Validates search limits.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(RecordScoutError::configuration(
                "max_concurrency must be greater than 0",
            ));
        }
        if self.source_timeout_secs == 0 {
            return Err(RecordScoutError::configuration(
                "source_timeout_secs must be greater than 0",
            ));
        }
        self.connection_config().validate()
    }

    /// Connector-level settings derived from these limits.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::default()
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_query_timeout(Duration::from_secs(self.query_timeout_secs))
            .with_max_connections(self.max_connections)
    }
}

/// Complete engine configuration as loaded from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub keywords: KeywordConfig,
    pub search: SearchConfig,
}

impl EngineConfig {
    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RecordScoutError::io(format!("Failed to read config {}", path.display()), e)
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            RecordScoutError::serialization(
                format!("Failed to parse config {}", path.display()),
                e,
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.keywords.validate()?;
        self.search.validate()
    }
}
