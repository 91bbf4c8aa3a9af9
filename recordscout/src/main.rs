//! Federated person-record search tool.
//!
//! Loads a registry of data sources, searches them for a person identifier
//! and prints redacted results as JSON on stdout. Logs go to stderr.
//!
//! # Security Guarantees
//! - Read-only access to every source
//! - Sensitive columns never reach stdout
//! - Credentials are never logged

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use recordscout_core::{
    AuditSink, DataSourceId, EngineConfig, JsonlAuditLog, MemoryAuditLog, MemoryDataSourceStore,
    SearchEngine, SourceDescriptor, group_by_person, logging::init_logging, supported_types,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "recordscout")]
#[command(about = "Federated person-record search with redaction")]
#[command(version)]
#[command(long_about = "
RecordScout - find every record about a person across databases and files

Searches PostgreSQL, MySQL and SQLite databases together with CSV, JSON and
XML files for a person identifier. Sensitive columns are removed before
results are printed, and matches are grouped per person with provenance.

EXAMPLES:
  recordscout --sources sources.json search jane.doe@example.com
  recordscout --sources sources.json provenance C100
  recordscout --sources sources.json query 2 \"SELECT name FROM customers\"
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Data source registry
    #[arg(
        long,
        env = "RECORDSCOUT_SOURCES",
        default_value = "sources.json",
        help = "JSON file listing the data sources to search"
    )]
    pub sources: PathBuf,

    /// Engine configuration
    #[arg(
        long,
        env = "RECORDSCOUT_CONFIG",
        help = "JSON file with keyword and search settings"
    )]
    pub config: Option<PathBuf>,

    /// Audit log destination
    #[arg(
        long,
        env = "RECORDSCOUT_AUDIT_LOG",
        help = "Append audit events to this JSON-lines file"
    )]
    pub audit_log: Option<PathBuf>,

    /// Acting user
    #[arg(long, env = "RECORDSCOUT_USER", default_value = "cli")]
    pub user: String,

    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, help = "Suppress all logs except errors")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Search every active source, or selected ones, for a person
    Search(SearchArgs),
    /// Search a single source
    SearchSource(SourceSearchArgs),
    /// Show every record keyed to one person across all sources
    Provenance(ProvenanceArgs),
    /// Run a read-only query against one source
    Query(QueryArgs),
    /// Introspect a source descriptor and print its classified schema
    Inspect(InspectArgs),
    /// Re-read the schema of a registered source
    Refresh(SourceArg),
    /// Test connectivity to a registered source
    Test(SourceArg),
    /// List registered sources
    Sources,
    /// List supported source types
    Types,
}

#[derive(Args)]
pub struct SearchArgs {
    /// Person identifier, such as an email address or customer number
    pub identifier: String,

    /// Restrict the search to these source ids
    #[arg(long, value_delimiter = ',')]
    pub source: Vec<DataSourceId>,

    /// Print rows grouped by person key instead of by source
    #[arg(long)]
    pub group: bool,
}

#[derive(Args)]
pub struct SourceSearchArgs {
    pub source_id: DataSourceId,
    pub identifier: String,
}

#[derive(Args)]
pub struct ProvenanceArgs {
    pub identifier: String,

    /// Print flat export rows instead of the full report
    #[arg(long)]
    pub rows: bool,
}

#[derive(Args)]
pub struct QueryArgs {
    pub source_id: DataSourceId,
    pub query: String,
}

#[derive(Args)]
pub struct InspectArgs {
    /// JSON file holding a single source descriptor
    pub descriptor: PathBuf,
}

#[derive(Args)]
pub struct SourceArg {
    pub source_id: DataSourceId,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    if matches!(cli.command, Command::Types) {
        list_supported_types();
        return Ok(());
    }

    let engine = build_engine(&cli.global).await?;
    let user = cli.global.user.as_str();

    match cli.command {
        Command::Search(args) => {
            let selected = (!args.source.is_empty()).then_some(args.source.as_slice());
            let result = engine
                .global_search(&args.identifier, user, selected)
                .await?;
            if !result.failures.is_empty() {
                warn!("{} sources could not be searched", result.failures.len());
            }
            if args.group {
                print_json(&group_by_person(&result, engine.classifier()))
            } else {
                print_json(&result)
            }
        }
        Command::SearchSource(args) => {
            let result = engine
                .search_by_data_source(args.source_id, &args.identifier, user)
                .await?;
            print_json(&result)
        }
        Command::Provenance(args) => {
            let report = engine
                .get_person_provenance(&args.identifier, user)
                .await?;
            if args.rows {
                print_json(&report.to_export_rows())
            } else {
                print_json(&report)
            }
        }
        Command::Query(args) => {
            let result = engine
                .execute_custom_query(args.source_id, &args.query, user)
                .await?;
            print_json(&result)
        }
        Command::Inspect(args) => {
            let descriptor = read_descriptor(&args.descriptor).await?;
            let record = engine.create_data_source(descriptor, user).await?;
            print_json(&record)
        }
        Command::Refresh(args) => {
            let record = engine.refresh_schema(args.source_id, user).await?;
            print_json(&record)
        }
        Command::Test(args) => {
            let (ok, message) = engine.test_data_source_connection(args.source_id).await;
            if !ok {
                bail!("Connection test failed: {}", message);
            }
            info!("✓ Connection test successful");
            println!("{}", message);
            Ok(())
        }
        Command::Sources => print_json(&engine.data_sources().await?),
        Command::Types => Ok(()),
    }
}

/// Builds the engine from the registry, optional config and audit sink.
async fn build_engine(global: &GlobalArgs) -> anyhow::Result<SearchEngine> {
    let config = match &global.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let store = if global.sources.exists() {
        MemoryDataSourceStore::from_file(&global.sources).await?
    } else {
        warn!(
            "Source registry {} not found, starting empty",
            global.sources.display()
        );
        MemoryDataSourceStore::new()
    };

    let audit: Arc<dyn AuditSink> = match &global.audit_log {
        Some(path) => Arc::new(JsonlAuditLog::open(path.clone()).await?),
        None => Arc::new(MemoryAuditLog::new()),
    };

    Ok(SearchEngine::from_config(Arc::new(store), audit, &config)?)
}

async fn read_descriptor(path: &Path) -> anyhow::Result<SourceDescriptor> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read descriptor {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse descriptor {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn list_supported_types() {
    println!("Supported Source Types:");
    println!();
    for (name, description) in supported_types() {
        println!("  {:<10} {}", name, description);
    }
    println!();
    println!("Relational sources need the matching driver feature:");
    println!("  postgres   --features postgresql");
    println!("  mysql      --features mysql");
    println!("  sqlite     --features sqlite");
}
