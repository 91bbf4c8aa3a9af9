//! Builds the right connector for a source descriptor.

use super::{
    ConnectionConfig, Connector, FileConnector, SourceDescriptor, SourceKind, SqlConnector,
    SqlDialect,
};
use crate::Result;
use crate::classifier::SchemaClassifier;
use crate::error::RecordScoutError;
use crate::security::{UrlParts, build_network_url, build_sqlite_url};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Source types this build understands, as `(type, description)` pairs.
///
/// Relational drivers are listed even when their feature is disabled;
/// asking for one then fails at construction with the feature's name.
pub fn supported_types() -> Vec<(&'static str, &'static str)> {
    vec![
        ("postgres", "PostgreSQL database"),
        ("mysql", "MySQL or MariaDB database"),
        ("sqlite", "SQLite database file"),
        ("csv", "Delimited text file with a header row"),
        ("json", "JSON document of records"),
        ("xml", "XML document with record, item or row elements"),
    ]
}

/// Creates connectors that share one classifier and connection settings.
///
/// # Example
/// ```rust
/// use recordscout_core::connectors::{ConnectorFactory, SourceDescriptor};
///
/// let factory = ConnectorFactory::default();
/// let descriptor = SourceDescriptor::relational("legacy", "db2");
/// assert!(factory.create_connector(&descriptor).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectorFactory {
    classifier: Arc<SchemaClassifier>,
    config: ConnectionConfig,
}

impl ConnectorFactory {
    pub fn new(classifier: Arc<SchemaClassifier>) -> Self {
        Self {
            classifier,
            config: ConnectionConfig::default(),
        }
    }

    /// Builder method to set the connection settings for relational sources.
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn classifier(&self) -> &Arc<SchemaClassifier> {
        &self.classifier
    }

    /// Builds a disconnected connector for the descriptor.
    ///
    /// # Errors
    /// Returns `UnsupportedSource` for unknown kinds, drivers and formats or
    /// for drivers not compiled in, and a configuration error when required
    /// attributes are missing
    pub fn create_connector(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn Connector>> {
        match &descriptor.kind {
            SourceKind::Relational => {
                let dialect = resolve_dialect(descriptor)?;
                if !dialect.is_enabled() {
                    return Err(RecordScoutError::unsupported_source(
                        "relational",
                        format!(
                            "driver '{}' requires the '{}' feature",
                            dialect,
                            dialect.feature()
                        ),
                    ));
                }
                let url = self.relational_url(descriptor, dialect)?;
                tracing::debug!(
                    "Building {} connector for '{}'",
                    dialect,
                    descriptor.name
                );
                Ok(Box::new(SqlConnector::new(
                    descriptor.name.clone(),
                    dialect,
                    url,
                    self.config.clone(),
                    Arc::clone(&self.classifier),
                )))
            }
            SourceKind::File => {
                let path = descriptor.file_path.clone().ok_or_else(|| {
                    RecordScoutError::configuration(format!(
                        "file source '{}' has no file_path",
                        descriptor.name
                    ))
                })?;
                let format = descriptor.file_format()?;
                tracing::debug!(
                    "Building {} file connector for '{}'",
                    format,
                    descriptor.name
                );
                Ok(Box::new(FileConnector::new(
                    descriptor.name.clone(),
                    path,
                    format,
                    Arc::clone(&self.classifier),
                )))
            }
            SourceKind::Other(kind) => Err(RecordScoutError::unsupported_source(
                kind.clone(),
                format!("unknown source kind for '{}'", descriptor.name),
            )),
        }
    }

    /// Builds a connector, connects and disconnects again.
    ///
    /// Never fails; every problem is reported in the message. The connector
    /// is always disconnected before returning.
    pub async fn test_connection(&self, descriptor: &SourceDescriptor) -> (bool, String) {
        let mut connector = match self.create_connector(descriptor) {
            Ok(connector) => connector,
            Err(e) => return (false, e.to_string()),
        };

        let outcome = connector.connect().await;
        connector.disconnect().await;

        match outcome {
            Ok(()) => {
                tracing::info!("Connection test for '{}' succeeded", descriptor.name);
                (true, format!("Connection to '{}' successful", descriptor.name))
            }
            Err(e) => {
                tracing::warn!("Connection test for '{}' failed: {}", descriptor.name, e);
                (false, e.to_string())
            }
        }
    }

    fn relational_url(
        &self,
        descriptor: &SourceDescriptor,
        dialect: SqlDialect,
    ) -> Result<Zeroizing<String>> {
        if let Some(connection_string) = &descriptor.connection_string {
            return Ok(match dialect {
                SqlDialect::Sqlite => build_sqlite_url(connection_string, self.config.read_only),
                _ => Zeroizing::new(connection_string.clone()),
            });
        }

        if dialect == SqlDialect::Sqlite {
            let path = descriptor
                .database
                .clone()
                .or_else(|| {
                    descriptor
                        .file_path
                        .as_ref()
                        .map(|p| p.to_string_lossy().into_owned())
                })
                .ok_or_else(|| {
                    RecordScoutError::configuration(format!(
                        "SQLite source '{}' needs a database or file_path",
                        descriptor.name
                    ))
                })?;
            return Ok(build_sqlite_url(&path, self.config.read_only));
        }

        build_network_url(
            dialect.scheme(),
            UrlParts {
                host: descriptor.host.as_deref(),
                port: descriptor.port,
                database: descriptor.database.as_deref(),
                username: descriptor.username.as_deref(),
                password: descriptor.password.as_deref(),
            },
        )
    }
}

/// Picks the dialect from the driver name, or from the URL scheme when no
/// driver is given.
fn resolve_dialect(descriptor: &SourceDescriptor) -> Result<SqlDialect> {
    let from_url = descriptor
        .connection_string
        .as_deref()
        .and_then(SqlDialect::from_url);

    match (descriptor.driver.as_deref(), from_url) {
        (Some(driver), url_dialect) => {
            let dialect: SqlDialect = driver.parse()?;
            if url_dialect.is_some_and(|d| d != dialect) {
                return Err(RecordScoutError::configuration(format!(
                    "connection string of '{}' does not match driver '{}'",
                    descriptor.name, driver
                )));
            }
            Ok(dialect)
        }
        (None, Some(dialect)) => Ok(dialect),
        (None, None) => Err(RecordScoutError::unsupported_source(
            "relational",
            format!("no driver given for '{}'", descriptor.name),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> ConnectorFactory {
        ConnectorFactory::default()
    }

    #[test]
    fn test_unknown_driver_is_unsupported() {
        let descriptor = SourceDescriptor::relational("legacy", "unknown");
        let Err(err) = factory().create_connector(&descriptor) else {
            panic!("unknown driver should fail");
        };
        assert!(matches!(err, RecordScoutError::UnsupportedSource { .. }));
    }

    #[tokio::test]
    async fn test_connection_reports_unknown_driver_without_error() {
        let descriptor = SourceDescriptor::relational("legacy", "unknown");
        let (ok, message) = factory().test_connection(&descriptor).await;
        assert!(!ok);
        assert!(message.contains("unknown"));
    }

    #[test]
    fn test_unknown_kind_is_unsupported() {
        let descriptor = SourceDescriptor::new("crm", SourceKind::Other("ldap".to_string()));
        let Err(err) = factory().create_connector(&descriptor) else {
            panic!("unknown kind should fail");
        };
        assert!(matches!(
            err,
            RecordScoutError::UnsupportedSource { ref kind, .. } if kind == "ldap"
        ));
    }

    #[test]
    fn test_missing_driver_and_url_is_unsupported() {
        let descriptor = SourceDescriptor::new("crm", SourceKind::Relational);
        let Err(err) = factory().create_connector(&descriptor) else {
            panic!("missing driver should fail");
        };
        assert!(matches!(err, RecordScoutError::UnsupportedSource { .. }));
    }

    #[test]
    fn test_file_source_requires_path_and_format() {
        let mut descriptor = SourceDescriptor::new("people", SourceKind::File);
        descriptor.format = Some("csv".to_string());
        let Err(err) = factory().create_connector(&descriptor) else {
            panic!("missing path should fail");
        };
        assert!(matches!(err, RecordScoutError::Configuration { .. }));

        let descriptor = SourceDescriptor::file("people", "/data/people.parquet");
        let Err(err) = factory().create_connector(&descriptor) else {
            panic!("unknown format should fail");
        };
        assert!(matches!(err, RecordScoutError::UnsupportedSource { .. }));

        let descriptor = SourceDescriptor::file("people", "/data/people.csv");
        let connector = factory().create_connector(&descriptor).expect("csv connector");
        assert_eq!(connector.name(), "people");
        assert!(!connector.is_connected());
    }

    #[test]
    fn test_conflicting_driver_and_url() {
        let descriptor = SourceDescriptor::relational("crm", "mysql")
            .with_connection_string("postgres://reader@localhost/crm");
        let Err(err) = factory().create_connector(&descriptor) else {
            panic!("mismatch should fail");
        };
        assert!(matches!(err, RecordScoutError::Configuration { .. }));
    }

    #[cfg(feature = "postgresql")]
    #[test]
    fn test_network_source_needs_host() {
        let descriptor = SourceDescriptor::relational("crm", "postgres").with_database("crm");
        let Err(err) = factory().create_connector(&descriptor) else {
            panic!("missing host should fail");
        };
        assert!(matches!(err, RecordScoutError::Configuration { .. }));

        let descriptor = SourceDescriptor::relational("crm", "postgresql")
            .with_host("db.internal")
            .with_database("crm")
            .with_credentials("reader", Some("hunter2".to_string()));
        let connector = factory().create_connector(&descriptor).expect("connector");
        assert_eq!(connector.name(), "crm");
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_connection_to_missing_sqlite_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.db");
        let descriptor =
            SourceDescriptor::relational("local", "sqlite").with_database(path.to_string_lossy());

        let (ok, message) = factory().test_connection(&descriptor).await;
        assert!(!ok);
        assert!(!message.is_empty());
        assert!(!path.exists(), "read-only mode must not create the file");
    }

    #[tokio::test]
    async fn test_connection_to_file_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "name\nJane Doe\n").expect("write fixture");

        let (ok, message) = factory()
            .test_connection(&SourceDescriptor::file("people", &path))
            .await;
        assert!(ok, "{}", message);

        let (ok, _) = factory()
            .test_connection(&SourceDescriptor::file("gone", dir.path().join("gone.csv")))
            .await;
        assert!(!ok);
    }

    #[test]
    fn test_supported_types() {
        let types: Vec<&str> = supported_types().into_iter().map(|(t, _)| t).collect();
        assert_eq!(types, vec!["postgres", "mysql", "sqlite", "csv", "json", "xml"]);
    }
}
