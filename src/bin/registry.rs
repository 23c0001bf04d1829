//! Schema Registry CLI
//!
//! Inspect and migrate event table schemas held in the operation log.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use event_schemas::{
    RegistryConfig, RegistryError, Schema, SchemaService, UpdateSchemaRequest, VersionStore,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-registry")]
#[command(about = "Manage versioned event table schemas")]
struct Cli {
    /// Path to a registry.toml config file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the SQLite database path
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every tracked event with its current version
    List,

    /// Show the schema of an event
    Show {
        event: String,
        /// Show the schema as of this version
        #[arg(short, long)]
        version: Option<u32>,
    },

    /// Show the operations that produced a version
    Migration { event: String, version: u32 },

    /// List the versions of an event
    History { event: String },

    /// Create a schema from a JSON file ({"event_name": ..., "columns": [...]})
    Create { file: PathBuf },

    /// Apply a migration from a JSON file ({"additions": [...], "deletions": [...]})
    Update {
        event: String,
        file: PathBuf,
        /// Version the migration was written against (defaults to current)
        #[arg(short, long)]
        expect: Option<u32>,
        /// Re-read and retry this many times if another writer wins
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },

    /// List accepted column types
    Types,

    /// Write the effective configuration to a file
    InitConfig {
        #[arg(default_value = "registry.toml")]
        output: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = RegistryConfig::load_from(cli.config.as_deref())
        .context("loading configuration")?;
    if let Some(path) = cli.database {
        config.store.path = path;
    }

    if let Commands::InitConfig { output } = &cli.command {
        config.save(output)?;
        println!("✅ Configuration written to {}", output);
        return Ok(());
    }

    let service = SchemaService::new(VersionStore::open(&config)?);

    match cli.command {
        Commands::List => {
            let schemas = service.get_all_schemas()?;
            if schemas.is_empty() {
                println!("No schemas registered");
            }
            for schema in schemas {
                println!(
                    "{:<40} v{:<4} {:>3} columns  {}",
                    schema.event_name,
                    schema.version,
                    schema.columns.len(),
                    schema.checksum()?.short()
                );
            }
        }

        Commands::Show { event, version } => {
            let schema = service.get_schema(&event, version)?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }

        Commands::Migration { event, version } => {
            let ops = service.get_migration(&event, version)?;
            println!("{}", serde_json::to_string_pretty(&ops)?);
        }

        Commands::History { event } => {
            for summary in service.get_versions(&event)? {
                let at = summary
                    .recorded_at
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!("v{:<4} {:>3} operations  {}", summary.version, summary.operations, at);
            }
        }

        Commands::Create { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let schema: Schema = serde_json::from_str(&content)?;
            let created = service.create_schema(&schema.event_name, schema.columns)?;
            println!(
                "✅ Created {} v0 with {} columns",
                created.event_name,
                created.columns.len()
            );
        }

        Commands::Update {
            event,
            file,
            expect,
            retries,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let mut request: UpdateSchemaRequest = serde_json::from_str(&content)?;
            request.event_name = event.clone();

            let mut attempt = 0;
            let updated = loop {
                let expected = match expect {
                    Some(v) => v,
                    None => service.get_schema(&event, None)?.version,
                };
                match service.update_schema(expected, request.clone()) {
                    Ok(schema) => break schema,
                    // A pinned version cannot become current again; only
                    // retry when tracking whatever is current.
                    Err(e @ RegistryError::VersionConflict { .. })
                        if expect.is_none() && attempt < retries =>
                    {
                        attempt += 1;
                        tracing::warn!(attempt, error = %e, "Retrying after conflict");
                    }
                    Err(e) => bail!(e),
                }
            };
            println!(
                "✅ {} is now v{} with {} columns",
                updated.event_name,
                updated.version,
                updated.columns.len()
            );
        }

        Commands::Types => {
            for transform in service.transforms() {
                println!("{}", transform);
            }
        }

        Commands::InitConfig { .. } => unreachable!("handled before opening the store"),
    }

    Ok(())
}
