//! Configuration types for connectors.
//!
//! - `ConnectionConfig`: pool and timeout settings for relational connectors
//! - `SourceDescriptor`: what a data source is and how to reach it
//!
//! # Security
//! Descriptors may carry a password; it is never printed by `Debug` and
//! never serialized.

mod connection;
mod descriptor;

pub use connection::ConnectionConfig;
pub use descriptor::{FileFormat, SourceDescriptor, SourceKind};
