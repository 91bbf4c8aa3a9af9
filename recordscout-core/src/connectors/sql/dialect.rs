//! Per-backend SQL differences.
//!
//! All relational backends run through the `sqlx::any` driver, so the only
//! backend-specific parts are placeholder syntax, identifier quoting, the
//! text cast used for substring matching and the catalog queries.
//!
//! Catalog columns are cast to text in every query because the `any` driver
//! can only decode plain integer, float, boolean, text and blob values.

use crate::error::RecordScoutError;
use crate::models::ColumnMeta;
use std::fmt;
use std::str::FromStr;

/// Relational backend behind a SQL connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    Postgres,
    MySql,
    Sqlite,
}

impl SqlDialect {
    /// Guesses the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?;
        scheme.parse().ok()
    }

    /// URL scheme understood by `sqlx::any`.
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Cargo feature that compiles in this backend's driver.
    pub fn feature(self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Whether this backend's driver was compiled in.
    pub fn is_enabled(self) -> bool {
        match self {
            Self::Postgres => cfg!(feature = "postgresql"),
            Self::MySql => cfg!(feature = "mysql"),
            Self::Sqlite => cfg!(feature = "sqlite"),
        }
    }

    /// Session statement that makes every later statement read-only.
    pub fn read_only_sql(self) -> &'static str {
        match self {
            Self::Postgres => "SET default_transaction_read_only = on",
            Self::MySql => "SET SESSION TRANSACTION READ ONLY",
            Self::Sqlite => "PRAGMA query_only = ON",
        }
    }

    /// Lowercases a search value the way the backend's `LOWER()` does.
    ///
    /// SQLite's built-in `LOWER()` only folds ASCII letters, so `"JOSÉ"`
    /// becomes `"josÉ"` on both sides of the comparison.
    pub fn fold_case(self, value: &str) -> String {
        match self {
            Self::Sqlite => value.to_ascii_lowercase(),
            Self::Postgres | Self::MySql => value.to_lowercase(),
        }
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${}", index),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }

    /// Quotes an identifier, doubling any embedded quote character.
    pub fn quote_ident(self, ident: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", ident.replace('`', "``")),
            Self::Postgres | Self::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Type name used by `CAST(... AS <type>)` to obtain text.
    pub fn text_type(self) -> &'static str {
        match self {
            Self::MySql => "CHAR",
            Self::Postgres | Self::Sqlite => "TEXT",
        }
    }

    /// Select-list entry for a column, cast to text when the `any` driver
    /// could not decode its declared type.
    pub fn projection(self, column: &ColumnMeta) -> String {
        let quoted = self.quote_ident(&column.name);
        if self.decodes_natively(&column.declared_type) {
            quoted
        } else {
            format!("CAST({} AS {}) AS {}", quoted, self.text_type(), quoted)
        }
    }

    fn decodes_natively(self, declared_type: &str) -> bool {
        let ty = declared_type.trim().to_lowercase();
        match self {
            // Storage classes are always integer, real, text, blob or null.
            Self::Sqlite => true,
            Self::Postgres => matches!(
                ty.as_str(),
                "boolean"
                    | "smallint"
                    | "integer"
                    | "bigint"
                    | "real"
                    | "double precision"
                    | "text"
                    | "character varying"
                    | "character"
                    | "bytea"
            ),
            Self::MySql => {
                if ty.contains("unsigned") {
                    return false;
                }
                let base = ty.split('(').next().unwrap_or("").trim();
                matches!(
                    base,
                    "tinyint"
                        | "smallint"
                        | "int"
                        | "integer"
                        | "bigint"
                        | "float"
                        | "double"
                        | "char"
                        | "varchar"
                        | "text"
                        | "tinytext"
                        | "mediumtext"
                        | "longtext"
                )
            }
        }
    }

    /// Lists base tables of the current schema as `table_name`.
    pub fn list_tables_sql(self) -> &'static str {
        match self {
            Self::Postgres => {
                "SELECT table_name::text AS table_name \
                 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name"
            }
            Self::MySql => {
                "SELECT CAST(table_name AS CHAR) AS table_name \
                 FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name"
            }
            Self::Sqlite => {
                "SELECT name AS table_name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name"
            }
        }
    }

    /// Columns of one table as `column_name`, `data_type`, `is_nullable`
    /// ('YES'/'NO') and `column_default`, in declaration order.
    pub fn columns_sql(self) -> &'static str {
        match self {
            Self::Postgres => {
                "SELECT column_name::text AS column_name, data_type::text AS data_type, \
                 is_nullable::text AS is_nullable, column_default::text AS column_default \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 \
                 ORDER BY ordinal_position"
            }
            Self::MySql => {
                "SELECT CAST(column_name AS CHAR) AS column_name, \
                 CAST(column_type AS CHAR) AS data_type, \
                 CAST(is_nullable AS CHAR) AS is_nullable, \
                 CAST(column_default AS CHAR) AS column_default \
                 FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                 ORDER BY ordinal_position"
            }
            Self::Sqlite => {
                "SELECT name AS column_name, type AS data_type, \
                 CASE WHEN \"notnull\" = 0 THEN 'YES' ELSE 'NO' END AS is_nullable, \
                 dflt_value AS column_default \
                 FROM pragma_table_info(?) ORDER BY cid"
            }
        }
    }

    /// Primary key columns of one table as `column_name`, in key order.
    pub fn primary_keys_sql(self) -> &'static str {
        match self {
            Self::Postgres => {
                "SELECT kcu.column_name::text AS column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                  AND tc.table_name = kcu.table_name \
                 WHERE tc.constraint_type = 'PRIMARY KEY' \
                   AND tc.table_schema = current_schema() AND tc.table_name = $1 \
                 ORDER BY kcu.ordinal_position"
            }
            Self::MySql => {
                "SELECT CAST(column_name AS CHAR) AS column_name \
                 FROM information_schema.key_column_usage \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                   AND constraint_name = 'PRIMARY' \
                 ORDER BY ordinal_position"
            }
            Self::Sqlite => {
                "SELECT name AS column_name FROM pragma_table_info(?) \
                 WHERE pk > 0 ORDER BY pk"
            }
        }
    }

    /// Foreign keys of one table as `column_name`, `referenced_table` and
    /// `referenced_column`.
    pub fn foreign_keys_sql(self) -> &'static str {
        match self {
            Self::Postgres => {
                "SELECT kcu.column_name::text AS column_name, \
                 ccu.table_name::text AS referenced_table, \
                 ccu.column_name::text AS referenced_column \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON ccu.constraint_name = tc.constraint_name \
                  AND ccu.table_schema = tc.table_schema \
                 WHERE tc.constraint_type = 'FOREIGN KEY' \
                   AND tc.table_schema = current_schema() AND tc.table_name = $1 \
                 ORDER BY kcu.ordinal_position"
            }
            Self::MySql => {
                "SELECT CAST(column_name AS CHAR) AS column_name, \
                 CAST(referenced_table_name AS CHAR) AS referenced_table, \
                 CAST(referenced_column_name AS CHAR) AS referenced_column \
                 FROM information_schema.key_column_usage \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                   AND referenced_table_name IS NOT NULL \
                 ORDER BY ordinal_position"
            }
            Self::Sqlite => {
                "SELECT \"from\" AS column_name, \"table\" AS referenced_table, \
                 \"to\" AS referenced_column \
                 FROM pragma_foreign_key_list(?) ORDER BY id, seq"
            }
        }
    }

    /// Planner row estimate for one table as `estimate`, where the catalog
    /// keeps one.
    pub fn row_estimate_sql(self) -> Option<&'static str> {
        match self {
            Self::Postgres => Some(
                "SELECT CAST(c.reltuples AS BIGINT) AS estimate \
                 FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = current_schema() AND c.relname = $1",
            ),
            Self::MySql => Some(
                "SELECT CAST(table_rows AS SIGNED) AS estimate \
                 FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?",
            ),
            Self::Sqlite => None,
        }
    }
}

impl FromStr for SqlDialect {
    type Err = RecordScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(RecordScoutError::unsupported_source(
                "relational",
                format!("driver '{}'", other),
            )),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}
