//! Audit trail for searches and administrative actions.
//!
//! The engine reports every search, schema refresh and custom query to an
//! [`AuditSink`]. A failing sink never fails the operation that reported to
//! it; the engine logs the failure and carries on.

use crate::Result;
use crate::error::RecordScoutError;
use crate::models::Row;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

/// Action recorded for a session-creating search.
pub const SEARCH_SESSION_ACTION: &str = "search_session";

/// One audited action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    /// Action name, e.g. `global_search` or `custom_query`
    pub action: String,
    /// Action-specific fields; never holds result rows or credentials
    pub details: Row,
}

impl AuditEvent {
    /// Creates an event stamped with the current time.
    pub fn new(user_id: impl Into<String>, action: impl Into<String>, details: Row) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id: user_id.into(),
            action: action.into(),
            details,
        }
    }
}

/// Summary of one global search, kept so exports can refer back to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSessionRecord {
    pub user_id: String,
    pub search_query: String,
    /// Total rows returned to the user
    pub results_count: usize,
    /// Names of the sources that answered
    pub data_sources_queried: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl SearchSessionRecord {
    fn details(&self, session_id: &str) -> Row {
        let mut details = Row::new();
        details.insert("session_id".into(), JsonValue::from(session_id));
        details.insert("search_query".into(), JsonValue::from(self.search_query.as_str()));
        details.insert("results_count".into(), JsonValue::from(self.results_count));
        details.insert(
            "data_sources_queried".into(),
            JsonValue::from(self.data_sources_queried.clone()),
        );
        details
    }
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records one action.
    async fn log_action(&self, user_id: &str, action: &str, details: Row) -> Result<()>;

    /// Stores a search session and returns its opaque id.
    async fn create_search_session(&self, session: SearchSessionRecord) -> Result<String>;
}

/// In-memory audit log for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
    sessions: RwLock<Vec<(String, SearchSessionRecord)>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    /// Events with the given action name.
    pub async fn events_for(&self, action: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    /// All stored search sessions with their ids.
    pub async fn sessions(&self) -> Vec<(String, SearchSessionRecord)> {
        self.sessions.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn log_action(&self, user_id: &str, action: &str, details: Row) -> Result<()> {
        self.events
            .write()
            .await
            .push(AuditEvent::new(user_id, action, details));
        Ok(())
    }

    async fn create_search_session(&self, session: SearchSessionRecord) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .push((session_id.clone(), session));
        Ok(session_id)
    }
}

/// Append-only JSON-lines audit file.
///
/// Each line is one [`AuditEvent`]. Search sessions are written as events
/// with the `search_session` action and the session fields as details.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditLog {
    /// Opens the file for appending, creating it and its parent directory.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be opened
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RecordScoutError::io(
                    format!("Failed to create audit directory '{}'", parent.display()),
                    e,
                )
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                RecordScoutError::io(format!("Failed to open audit log '{}'", path.display()), e)
            })?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)
            .map_err(|e| RecordScoutError::serialization("Failed to encode audit event", e))?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| RecordScoutError::audit(format!("write to '{}': {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| RecordScoutError::audit(format!("flush '{}': {}", self.path.display(), e)))
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn log_action(&self, user_id: &str, action: &str, details: Row) -> Result<()> {
        self.append(&AuditEvent::new(user_id, action, details)).await
    }

    async fn create_search_session(&self, session: SearchSessionRecord) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let event = AuditEvent {
            timestamp: session.created_at,
            user_id: session.user_id.clone(),
            action: SEARCH_SESSION_ACTION.to_string(),
            details: session.details(&session_id),
        };
        self.append(&event).await?;
        Ok(session_id)
    }
}
