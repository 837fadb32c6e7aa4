//! dbcontext CLI - inspect what an agent would know about a schema
//!
//! Usage:
//!   dbcontext status
//!   dbcontext discover [--owner <owner>]
//!   dbcontext search <term> [--limit <n>]
//!   dbcontext similar <term> [--threshold <t>] [--limit <n>]
//!   dbcontext describe <name>
//!   dbcontext related <name>
//!   dbcontext columns <term> --table <name>...
//!   dbcontext refresh [--reprobe]
//!
//! Results are printed as JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dbcontext::config::Settings;
use dbcontext::DatabaseContext;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dbcontext")]
#[command(about = "dbcontext - permission-aware schema metadata for database agents")]
#[command(version)]
struct Cli {
    /// Path to a dbcontext.toml (defaults to the usual search locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print compact JSON
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cache generation, access tier and degraded conditions
    Status,

    /// List objects visible to the connecting principal
    Discover {
        /// Schema to list instead of the effective one
        #[arg(short, long)]
        owner: Option<String>,
    },

    /// Search object names (exact, then prefix, then substring)
    Search {
        term: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Fuzzy-match object names
    Similar {
        term: String,

        /// Minimum similarity between 0 and 1
        #[arg(short, long)]
        threshold: Option<f64>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show columns, comments and foreign keys of an object
    Describe {
        /// NAME or OWNER.NAME
        name: String,
    },

    /// Show tables referenced by and referencing a table
    Related { name: String },

    /// Find columns by name within tables
    Columns {
        /// Substring to look for (empty lists all columns)
        term: String,

        /// Table to search, repeatable
        #[arg(short, long = "table", required = true)]
        tables: Vec<String>,
    },

    /// Rebuild the schema cache now
    Refresh {
        /// Retry dictionary access from the top tier
        #[arg(long)]
        reprobe: bool,
    },

    /// Show the database product and version
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&settings.logging.filter);

    let ctx = match DatabaseContext::connect(settings).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error starting dbcontext: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = run(&ctx, cli.command, cli.compact).await;
    ctx.shutdown().await;
    code
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(ctx: &DatabaseContext, command: Commands, compact: bool) -> ExitCode {
    let result = match command {
        Commands::Status => Ok(to_json(&ctx.status(), compact)),
        Commands::Discover { owner } => ctx
            .discover(owner.as_deref())
            .await
            .map(|a| to_json(&a, compact)),
        Commands::Search { term, limit } => {
            ctx.search(&term, limit).await.map(|a| to_json(&a, compact))
        }
        Commands::Similar {
            term,
            threshold,
            limit,
        } => ctx
            .similarity_search(&term, threshold, limit)
            .await
            .map(|a| to_json(&a, compact)),
        Commands::Describe { name } => ctx.describe(&name).await.map(|a| to_json(&a, compact)),
        Commands::Related { name } => ctx
            .related_tables(&name)
            .await
            .map(|a| to_json(&a, compact)),
        Commands::Columns { term, tables } => ctx
            .search_columns(&tables, &term)
            .await
            .map(|a| to_json(&a, compact)),
        Commands::Refresh { reprobe } => {
            if reprobe {
                ctx.reprobe();
            }
            ctx.refresh_all().await.map(|r| to_json(&r, compact))
        }
        Commands::Info => Ok(to_json(&ctx.database_info().await, compact)),
    };

    match result {
        Ok(Ok(json)) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            eprintln!("Error rendering output: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_retryable() {
                eprintln!("(the condition may be temporary; try again)");
            }
            ExitCode::FAILURE
        }
    }
}

fn to_json<T: Serialize>(value: &T, compact: bool) -> serde_json::Result<String> {
    if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
}
