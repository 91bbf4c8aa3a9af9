//! Data source descriptors.

use crate::error::RecordScoutError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use zeroize::Zeroize;

/// Broad category of a data source.
///
/// Unknown kinds are kept verbatim so that rejecting them is the factory's
/// decision, not the parser's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceKind {
    Relational,
    File,
    Other(String),
}

impl From<String> for SourceKind {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "relational" | "database" | "sql" => Self::Relational,
            "file" => Self::File,
            _ => Self::Other(value),
        }
    }
}

impl From<SourceKind> for String {
    fn from(kind: SourceKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relational => f.write_str("relational"),
            Self::File => f.write_str("file"),
            Self::Other(kind) => f.write_str(kind),
        }
    }
}

/// Tabular file formats understood by the file connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Comma-delimited text with a header row
    Csv,
    /// Array of objects, or a single object
    Json,
    /// Markup with repeating record/item/row elements
    Xml,
}

impl FileFormat {
    /// Infers the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xml => "xml",
        }
    }
}

impl FromStr for FileFormat {
    type Err = RecordScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            other => Err(RecordScoutError::unsupported_source(
                "file",
                format!("file format '{}'", other),
            )),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes one data source and how to reach it.
///
/// Relational sources give either a complete `connection_string` or the
/// discrete `host`/`port`/`database`/`username`/`password` fields. File
/// sources give a `file_path` and optionally a `format`; without one the
/// format is taken from the file extension.
///
/// # Security
/// `password` and `connection_string` are skipped by `Serialize` and hidden
/// by `Debug`, and both are zeroed on drop.
///
/// # Example
/// ```rust
/// use recordscout_core::connectors::{SourceDescriptor, SourceKind};
///
/// let descriptor = SourceDescriptor::relational("crm", "postgres")
///     .with_host("db.internal")
///     .with_database("crm")
///     .with_credentials("reader", Some("hunter2".to_string()));
///
/// assert_eq!(descriptor.kind, SourceKind::Relational);
/// assert!(!format!("{:?}", descriptor).contains("hunter2"));
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Unique, user-facing source name
    pub name: String,
    pub kind: SourceKind,
    /// Relational driver name such as `postgresql`, `mysql` or `sqlite`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Full URL; takes precedence over the discrete fields below
    #[serde(default, skip_serializing)]
    pub connection_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Never serialized and zeroed on drop
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    /// File format override; inferred from the extension when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Drop for SourceDescriptor {
    fn drop(&mut self) {
        self.password.zeroize();
        self.connection_string.zeroize();
    }
}

impl fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hidden = |present: bool| if present { Some("<redacted>") } else { None };
        f.debug_struct("SourceDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("driver", &self.driver)
            .field("connection_string", &hidden(self.connection_string.is_some()))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &hidden(self.password.is_some()))
            .field("file_path", &self.file_path)
            .field("format", &self.format)
            .finish()
    }
}

impl SourceDescriptor {
    /// Creates a descriptor of the given kind with every attribute unset.
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            driver: None,
            connection_string: None,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            file_path: None,
            format: None,
        }
    }

    /// Creates a relational descriptor for the named driver.
    pub fn relational(name: impl Into<String>, driver: impl Into<String>) -> Self {
        let mut descriptor = Self::new(name, SourceKind::Relational);
        descriptor.driver = Some(driver.into());
        descriptor
    }

    /// Creates a file descriptor; the format is inferred from the extension.
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let mut descriptor = Self::new(name, SourceKind::File);
        descriptor.file_path = Some(path.into());
        descriptor
    }

    /// Builder method to set a complete connection string.
    pub fn with_connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = Some(connection_string.into());
        self
    }

    /// Builder method to set the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Builder method to set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder method to set the database name, or the file for SQLite.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Builder method to set credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// Builder method to set an explicit file format.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Resolves the file format from `format` or the file extension.
    ///
    /// # Errors
    /// Returns `UnsupportedSource` if neither names a known format
    pub fn file_format(&self) -> crate::Result<FileFormat> {
        match (&self.format, &self.file_path) {
            (Some(format), _) => format.parse(),
            (None, Some(path)) => FileFormat::from_path(path).ok_or_else(|| {
                RecordScoutError::unsupported_source(
                    "file",
                    format!("cannot infer format of '{}'", path.display()),
                )
            }),
            (None, None) => Err(RecordScoutError::configuration(format!(
                "file source '{}' has no file_path",
                self.name
            ))),
        }
    }
}
