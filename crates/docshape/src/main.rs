//! # docshape CLI (`dshape`)
//!
//! Ingests semi-structured text files into per-source record collections
//! and maintains a versioned, self-evolving schema for every source.
//!
//! ## Usage
//!
//! ```bash
//! dshape --config ./config/dshape.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dshape init` | Create the SQLite database and run migrations |
//! | `dshape ingest <file>` | Run the pipeline on one file |
//! | `dshape schema <source>` | Print the current schema (`--history` for all versions) |
//! | `dshape log <source>` | Print the schema evolution log |
//! | `dshape sources` | List ingested sources |
//! | `dshape records <source>` | Print stored records |
//! | `dshape summary <source>` | Print chunk types, top fields and schema history |
//! | `dshape quarantine <source> --confirm` | Move a source's records aside |
//! | `dshape serve` | Start the HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docshape::{config, ingest, logging, migrate, schema, server, sources};

/// docshape: turn mixed-format text into records with a versioned schema.
#[derive(Parser)]
#[command(
    name = "dshape",
    about = "docshape: ingest semi-structured text into records with a self-evolving schema",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dshape.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running it
    /// multiple times is safe.
    Init,

    /// Ingest one file.
    ///
    /// Detects chunks, parses them into records, infers the batch schema and
    /// evolves the source's stored schema.
    Ingest {
        /// File to ingest (.txt, .md, .html, .pdf by default).
        file: PathBuf,

        /// Source id. Derived from the file name when omitted.
        #[arg(long)]
        source: Option<String>,

        /// Run everything except the writes and report what would happen.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the current schema of a source as JSON.
    Schema {
        source: String,

        /// Print every stored version instead of the current one.
        #[arg(long)]
        history: bool,
    },

    /// Print the schema evolution log of a source as JSON.
    Log { source: String },

    /// List ingested sources.
    Sources,

    /// Print stored records of a source as JSON.
    Records {
        source: String,

        /// Records per page.
        #[arg(long, default_value_t = sources::DEFAULT_RECORD_LIMIT)]
        limit: i64,

        /// Page number, starting at 0.
        #[arg(long, default_value_t = 0)]
        page: i64,
    },

    /// Print a summary of a source as JSON.
    Summary { source: String },

    /// Move a source's records to a quarantine collection.
    Quarantine {
        source: String,

        /// Required; the move is not undone by any command.
        #[arg(long)]
        confirm: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            file,
            source,
            dry_run,
        } => {
            ingest::run_ingest(&cfg, &file, source, dry_run).await?;
        }
        Commands::Schema { source, history } => {
            schema::show_schema(&cfg, &source, history).await?;
        }
        Commands::Log { source } => {
            schema::show_log(&cfg, &source).await?;
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Records {
            source,
            limit,
            page,
        } => {
            if limit < 1 || page < 0 {
                anyhow::bail!("--limit must be >= 1 and --page >= 0");
            }
            sources::show_records(&cfg, &source, limit, page).await?;
        }
        Commands::Summary { source } => {
            sources::show_summary(&cfg, &source).await?;
        }
        Commands::Quarantine { source, confirm } => {
            sources::quarantine(&cfg, &source, confirm).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
