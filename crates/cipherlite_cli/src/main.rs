//! CipherLite CLI
//!
//! Command-line tools for CipherLite databases.
//!
//! # Commands
//!
//! - `exec` - Run statements that change the database
//! - `query` - Run a query and print its rows
//! - `inspect` - Display header fields, log state, and tables
//! - `verify` - Check page checksums and tree structure
//! - `checkpoint` - Fold the write-ahead log into the database file
//! - `selftest` - Run the functional self-test suite

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CipherLite command-line database tools.
#[derive(Parser)]
#[command(name = "cipherlite")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Passphrase of an encrypted database
    #[arg(global = true, short, long)]
    key: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format of commands that print data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run statements that change the database, creating it if needed
    Exec {
        /// SQL text; several statements may be separated by `;`
        sql: String,

        /// Positional parameters bound to `?` (single statement only)
        #[arg(short = 'b', long = "bind")]
        params: Vec<String>,
    },

    /// Run a query and print its rows
    Query {
        /// SQL text of a single statement
        sql: String,

        /// Positional parameters bound to `?`
        #[arg(short = 'b', long = "bind")]
        params: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Display header fields, log state, and tables
    Inspect {
        /// Count the rows of every table
        #[arg(short, long)]
        rows: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Check page checksums and tree structure
    Verify,

    /// Fold the write-ahead log into the database file
    Checkpoint,

    /// Run the functional self-test suite in a scratch directory
    Selftest {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG overrides the default level.
    let default = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let key = cli.key.as_deref();
    match cli.command {
        Commands::Exec { sql, params } => {
            let path = cli.path.ok_or("Database path required for exec")?;
            commands::exec::run(&path, key, &sql, &params)?;
        }
        Commands::Query {
            sql,
            params,
            format,
        } => {
            let path = cli.path.ok_or("Database path required for query")?;
            commands::query::run(&path, key, &sql, &params, format)?;
        }
        Commands::Inspect { rows, format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, key, rows, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Database path required for verify")?;
            commands::verify::run(&path, key)?;
        }
        Commands::Checkpoint => {
            let path = cli.path.ok_or("Database path required for checkpoint")?;
            commands::checkpoint::run(&path, key)?;
        }
        Commands::Selftest { format } => {
            commands::selftest::run(format)?;
        }
        Commands::Version => {
            println!("CipherLite CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("CipherLite Core v{}", cipherlite_core::VERSION);
            println!("Page codec: {}", if cipherlite_core::has_codec() { "yes" } else { "no" });
        }
    }

    Ok(())
}
