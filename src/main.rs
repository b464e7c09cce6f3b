//! # postvec CLI
//!
//! Indexes Markdown posts into Cloudflare Vectorize and queries them.
//!
//! ## Usage
//!
//! ```bash
//! postvec --config ./config/postvec.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `postvec index [PATHS...]` | Embed and upsert posts (all of `[content].root` by default) |
//! | `postvec search "<query>"` | Semantic search over the index |
//! | `postvec listing [PATHS...]` | Write the `{title, slug}` listing to KV |
//!
//! Diagnostics go to stderr and are filtered with `RUST_LOG` (default `warn`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use postvec::progress::ProgressMode;
use postvec::{config, ingest, listing, search};

/// postvec: semantic indexing for a Markdown blog on Cloudflare Vectorize.
#[derive(Parser)]
#[command(
    name = "postvec",
    about = "Index Markdown posts into Cloudflare Vectorize and search them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/postvec.toml`. Credentials may also come from
    /// `CLOUDFLARE_*` environment variables.
    #[arg(long, global = true, default_value = "./config/postvec.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed posts and upsert them into the vector index.
    ///
    /// With no paths, every Markdown file under `[content].root` is indexed.
    /// Re-indexing a post overwrites its previous record.
    Index {
        /// Files to index.
        paths: Vec<PathBuf>,

        /// Parse and assemble metadata without embedding or upserting.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of documents to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress on stderr: human, json, or off. Default: human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Search the index with a free-text query.
    Search {
        /// Query text.
        query: String,

        /// Maximum number of results (defaults to `[search].top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Look the query up in the KV title listing before vector search.
        #[arg(long)]
        titles: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Build the title/slug listing and write it to KV.
    Listing {
        /// Files to include (defaults to everything under `[content].root`).
        paths: Vec<PathBuf>,

        /// Print the listing without uploading it.
        #[arg(long)]
        dry_run: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index {
            paths,
            dry_run,
            limit,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_index(&cfg, &paths, dry_run, limit, mode).await?;
        }
        Commands::Search {
            query,
            top_k,
            titles,
            json,
        } => {
            search::run_search(&cfg, &query, top_k, titles, json).await?;
        }
        Commands::Listing { paths, dry_run } => {
            listing::run_listing(&cfg, &paths, dry_run).await?;
        }
    }

    Ok(())
}
