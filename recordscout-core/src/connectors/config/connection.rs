//! Connector connection settings.
//!
//! Where to connect lives on the `SourceDescriptor`; this struct only says
//! how: pool size, timeouts and read-only enforcement.

use crate::error::RecordScoutError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pool and timeout configuration for relational connectors.
///
/// # Example
/// ```rust
/// use recordscout_core::connectors::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::default()
///     .with_max_connections(4)
///     .with_query_timeout(Duration::from_secs(5));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Query timeout duration
    pub query_timeout: Duration,
    /// Maximum number of connections in pool
    pub max_connections: u32,
    /// Whether to enforce read-only mode
    pub read_only: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
            max_connections: 2,
            read_only: true,
        }
    }
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ConnectionConfig(pool={}, connect={}s, query={}s{})",
            self.max_connections,
            self.connect_timeout.as_secs(),
            self.query_timeout.as_secs(),
            if self.read_only { ", read-only" } else { "" }
        )
    }
}

impl ConnectionConfig {
    /// Validates connection configuration parameters.
    ///
    /// # Errors
    /// Returns error if configuration values are invalid or unsafe
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_connections == 0 {
            return Err(RecordScoutError::configuration(
                "max_connections must be greater than 0",
            ));
        }

        if self.max_connections > 100 {
            return Err(RecordScoutError::configuration(
                "max_connections should not exceed 100 for safety",
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(RecordScoutError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        if self.query_timeout.is_zero() {
            return Err(RecordScoutError::configuration(
                "query_timeout must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Builder method to set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder method to set the per-statement timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Builder method to set the pool size.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Builder method to turn read-only sessions on or off.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}
