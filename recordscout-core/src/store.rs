//! Registry of configured data sources.
//!
//! The engine treats the store as the source of truth for which sources are
//! active. Durable persistence belongs to whoever embeds the engine; the
//! in-memory store here is seeded from a JSON registry file.

use crate::Result;
use crate::connectors::SourceDescriptor;
use crate::error::RecordScoutError;
use crate::models::SchemaInfo;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;

/// Identifier of a stored data source.
pub type DataSourceId = i64;

/// A configured source with its last-known schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceRecord {
    pub id: DataSourceId,
    pub descriptor: SourceDescriptor,
    /// Schema captured at registration or the last refresh
    pub schema_info: Option<SchemaInfo>,
    /// Inactive sources are kept but never searched
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl DataSourceRecord {
    /// The source's unique name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// Persistence seam for data sources.
///
/// Every call acquires whatever handle it needs and releases it before
/// returning; nothing is held across a search.
#[async_trait]
pub trait DataSourceStore: Send + Sync {
    /// All active sources, ordered by id.
    async fn get_all_data_sources(&self) -> Result<Vec<DataSourceRecord>>;

    /// One source by id, active or not.
    async fn get_data_source_by_id(&self, id: DataSourceId) -> Result<Option<DataSourceRecord>>;

    /// Stores a new active source and returns it with its assigned id.
    async fn create_data_source(
        &self,
        descriptor: SourceDescriptor,
        schema_info: Option<SchemaInfo>,
        created_by: &str,
    ) -> Result<DataSourceRecord>;

    /// Replaces the stored schema of a source as a whole.
    ///
    /// # Errors
    /// Returns `NotFound` if no source has this id
    async fn update_schema(
        &self,
        id: DataSourceId,
        schema_info: SchemaInfo,
    ) -> Result<DataSourceRecord>;
}

#[derive(Debug, Default)]
struct Registry {
    records: BTreeMap<DataSourceId, DataSourceRecord>,
    next_id: DataSourceId,
}

impl Registry {
    fn allocate_id(&mut self) -> DataSourceId {
        self.next_id += 1;
        self.next_id
    }
}

/// One entry of a JSON registry file.
#[derive(Debug, Deserialize)]
struct RegistryEntry {
    #[serde(default)]
    id: Option<DataSourceId>,
    #[serde(default = "default_active")]
    is_active: bool,
    #[serde(default)]
    created_by: Option<String>,
    source: SourceDescriptor,
}

fn default_active() -> bool {
    true
}

/// In-memory data-source store.
#[derive(Debug, Default)]
pub struct MemoryDataSourceStore {
    registry: RwLock<Registry>,
}

impl MemoryDataSourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a registry file: a JSON array of
    /// `{"id"?, "is_active"?, "created_by"?, "source": {...}}` entries.
    ///
    /// Entries without an id are numbered after the highest explicit id.
    ///
    /// # Errors
    /// Returns an I/O or serialization error if the file cannot be read or
    /// parsed, and a configuration error for duplicate ids
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            RecordScoutError::io(
                format!("Failed to read source registry '{}'", path.display()),
                e,
            )
        })?;
        let entries: Vec<RegistryEntry> = serde_json::from_str(&content).map_err(|e| {
            RecordScoutError::serialization(
                format!("Invalid source registry '{}'", path.display()),
                e,
            )
        })?;

        let mut registry = Registry {
            next_id: entries.iter().filter_map(|e| e.id).max().unwrap_or(0),
            ..Registry::default()
        };
        let now = Utc::now();
        for entry in entries {
            let id = match entry.id {
                Some(id) => id,
                None => registry.allocate_id(),
            };
            if registry.records.contains_key(&id) {
                return Err(RecordScoutError::configuration(format!(
                    "duplicate data source id {} in '{}'",
                    id,
                    path.display()
                )));
            }
            registry.records.insert(
                id,
                DataSourceRecord {
                    id,
                    descriptor: entry.source,
                    schema_info: None,
                    is_active: entry.is_active,
                    created_by: entry.created_by.unwrap_or_else(|| "registry".to_string()),
                    created_at: now,
                    last_updated: now,
                },
            );
        }

        tracing::info!(
            "Loaded {} data sources from '{}'",
            registry.records.len(),
            path.display()
        );
        Ok(Self {
            registry: RwLock::new(registry),
        })
    }

    /// Marks a source inactive; it stays retrievable by id.
    pub async fn set_active(&self, id: DataSourceId, is_active: bool) -> Result<()> {
        let mut registry = self.registry.write().await;
        let record = registry
            .records
            .get_mut(&id)
            .ok_or_else(|| RecordScoutError::not_found(format!("data source {}", id)))?;
        record.is_active = is_active;
        record.last_updated = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl DataSourceStore for MemoryDataSourceStore {
    async fn get_all_data_sources(&self) -> Result<Vec<DataSourceRecord>> {
        let registry = self.registry.read().await;
        Ok(registry
            .records
            .values()
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }

    async fn get_data_source_by_id(&self, id: DataSourceId) -> Result<Option<DataSourceRecord>> {
        Ok(self.registry.read().await.records.get(&id).cloned())
    }

    async fn create_data_source(
        &self,
        descriptor: SourceDescriptor,
        schema_info: Option<SchemaInfo>,
        created_by: &str,
    ) -> Result<DataSourceRecord> {
        let mut registry = self.registry.write().await;
        let id = registry.allocate_id();
        let now = Utc::now();
        let record = DataSourceRecord {
            id,
            descriptor,
            schema_info,
            is_active: true,
            created_by: created_by.to_string(),
            created_at: now,
            last_updated: now,
        };
        registry.records.insert(id, record.clone());
        Ok(record)
    }

    async fn update_schema(
        &self,
        id: DataSourceId,
        schema_info: SchemaInfo,
    ) -> Result<DataSourceRecord> {
        let mut registry = self.registry.write().await;
        let record = registry
            .records
            .get_mut(&id)
            .ok_or_else(|| RecordScoutError::not_found(format!("data source {}", id)))?;
        record.schema_info = Some(schema_info);
        record.last_updated = Utc::now();
        Ok(record.clone())
    }
}
