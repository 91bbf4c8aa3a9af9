//! Core engine for RecordScout.
//!
//! Locates records about a person across relational databases and flat
//! files, removes sensitive columns before anything leaves a connector, and
//! groups what it finds by person with a provenance trail per match.
//!
//! # Security Guarantees
//! - Every source is accessed read-only
//! - Sensitive columns are removed from every result, including ad-hoc queries
//! - Credentials are never logged, serialized or included in errors
//! - Search values are bound as parameters, never interpolated into SQL
//!
//! # Architecture
//! - [`connectors`]: One object-safe trait over SQL and file sources, plus the factory
//! - [`classifier`]: Keyword-based sensitive and person-identifier flags
//! - [`search`]: Fan-out orchestration and person grouping
//! - [`store`] and [`audit`]: Seams to the persistence and audit collaborators

pub mod audit;
pub mod classifier;
pub mod config;
pub mod connectors;
pub mod error;
pub mod logging;
pub mod models;
pub mod search;
pub mod security;
pub mod store;

// Re-export commonly used types
pub use audit::{AuditEvent, AuditSink, JsonlAuditLog, MemoryAuditLog, SearchSessionRecord};
pub use classifier::{Classification, ClassificationWarning, SchemaClassifier};
pub use config::{EngineConfig, KeywordConfig, SearchConfig};
pub use connectors::{
    ConnectionConfig, Connector, ConnectorFactory, FileFormat, SourceDescriptor, SourceKind,
    supported_types,
};
pub use error::{RecordScoutError, Result};
pub use models::{
    ColumnMeta, ForeignKey, Row, SchemaInfo, SearchResult, SearchStatus, SourceFailure,
    TableResult, TableSchema,
};
pub use search::{
    CustomQueryResult, ProvenanceRecord, ProvenanceReport, SearchEngine, SourceSearchResult,
    group_by_person,
};
pub use store::{DataSourceId, DataSourceRecord, DataSourceStore, MemoryDataSourceStore};
