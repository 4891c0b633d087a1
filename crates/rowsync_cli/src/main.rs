//! RowSync CLI
//!
//! Command-line tools for RowSync databases.
//!
//! # Commands
//!
//! - `init` - Prepare a SQLite database for synchronization
//! - `status` - Display revisions and pending changes
//! - `schema` - Print the application schema as JSON
//! - `sync` - Synchronize a client database with a server database

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use rowsync_core::HashAlgorithm;
use rowsync_protocol::{ConflictPolicy, Role, SyncDirection};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// RowSync command-line tools.
#[derive(Parser)]
#[command(name = "rowsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Role a database plays.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scope {
    /// The authoritative party.
    Server,
    /// A replica.
    Client,
}

impl From<Scope> for Role {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Server => Role::Server,
            Scope::Client => Role::Client,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare a database for synchronization
    Init {
        /// Path to the SQLite database
        #[arg(long)]
        db: PathBuf,

        /// Role of the database
        #[arg(long, value_enum)]
        scope: Scope,

        /// JSON schema file to create tables from
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Display revisions and pending changes
    Status {
        /// Path to the SQLite database
        #[arg(long)]
        db: PathBuf,

        /// Tables to report on (all tables if omitted)
        #[arg(long = "table")]
        tables: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the application schema as JSON
    Schema {
        /// Path to the SQLite database
        #[arg(long)]
        db: PathBuf,
    },

    /// Synchronize a client database with a server database
    Sync {
        /// Path to the client database
        #[arg(long)]
        client: PathBuf,

        /// Path to the server database
        #[arg(long)]
        server: PathBuf,

        /// Participating tables
        #[arg(long = "table", required = true)]
        tables: Vec<String>,

        /// Direction for every table
        #[arg(long, default_value = "bidirectional")]
        direction: SyncDirection,

        /// Conflict policy for every table
        #[arg(long, default_value = "server-wins")]
        policy: ConflictPolicy,

        /// Row fingerprint algorithm
        #[arg(long, default_value = "sha256")]
        hash: HashAlgorithm,

        /// Give up after this many attempts
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Resend every local row and refetch everything
        #[arg(long)]
        full: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Init { db, scope, schema } => {
            commands::init::run(&db, scope.into(), schema.as_deref())?;
        }
        Commands::Status { db, tables, format } => {
            commands::status::run(&db, &tables, &format)?;
        }
        Commands::Schema { db } => {
            commands::schema::run(&db)?;
        }
        Commands::Sync {
            client,
            server,
            tables,
            direction,
            policy,
            hash,
            max_attempts,
            full,
        } => {
            let options = commands::sync::SyncOptions {
                tables,
                direction,
                policy,
                hash,
                max_attempts,
                full,
            };
            commands::sync::run(&client, &server, &options)?;
        }
    }

    Ok(())
}
