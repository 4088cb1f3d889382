//! File History - commit history of files in a git repository
//!
//! # Usage
//! ```bash
//! file-history log /path/to/repository src/main.rs   # Print a file's history
//! file-history log . README.md --json --revision v1.0
//! file-history serve /path/to/repository             # Start inspection server
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::{Parser, Subcommand};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use file_history::config::EngineConfig;
use file_history::git::CommitLoader;
use file_history::models::{CommitInfo, HistoryResponse};
use file_history::routes;

/// File History - which commits changed a file, as `git log <path>` reports it
#[derive(Parser)]
#[command(name = "file-history")]
#[command(about = "Resolve and cache per-file commit history", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory for the persisted commit-history cache
    #[arg(long, global = true, env = "FILE_HISTORY_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Cached histories kept per file
    #[arg(long, global = true, env = "FILE_HISTORY_MAX_ENTRIES")]
    max_entries: Option<usize>,

    /// Load histories with missing parent commits instead of failing
    #[arg(long, global = true, env = "FILE_HISTORY_ALLOW_INCOMPLETE")]
    allow_incomplete_history: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the commits that changed a file, most recent first
    Log {
        /// Path to the git repository
        #[arg(value_name = "REPO_PATH")]
        repo: PathBuf,

        /// File path relative to the repository root
        path: String,

        /// Revision to start from (defaults to HEAD)
        #[arg(short, long)]
        revision: Option<String>,

        /// Print JSON instead of one line per commit
        #[arg(long)]
        json: bool,

        /// Neither read nor write the commit-history cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Serve history queries over HTTP
    Serve {
        /// Path to the git repository
        #[arg(value_name = "REPO_PATH")]
        repo: PathBuf,

        /// Port to run the server on
        #[arg(short, long, default_value = "3001")]
        port: u16,
    },
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            cache_dir: self.cache_dir.clone(),
            allow_incomplete_history: self.allow_incomplete_history,
            ..EngineConfig::default()
        };
        if let Some(max) = self.max_entries {
            config.max_entries_per_file = max;
        }
        config
    }
}

fn print_log(path: &str, revision: &str, commits: Vec<CommitInfo>, json: bool) -> anyhow::Result<()> {
    if json {
        let response = HistoryResponse {
            path: path.to_string(),
            revision: revision.to_string(),
            commits,
        };
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    for commit in commits {
        println!(
            "{}  {}  {} <{}>",
            &commit.sha[..12],
            commit.timestamp.format("%Y-%m-%d %H:%M:%S %z"),
            commit.author_name,
            commit.author_email
        );
    }
    Ok(())
}

fn run_log(
    mut config: EngineConfig,
    repo: PathBuf,
    path: String,
    revision: Option<String>,
    json: bool,
    no_cache: bool,
) -> anyhow::Result<()> {
    if no_cache {
        config = config.without_cache();
    }
    let loader = CommitLoader::open(&repo, config)?;
    let revision = revision.unwrap_or_else(|| loader.config().default_revision.clone());

    let commits = loader.get_history(&path, Some(&revision))?;
    if let Err(e) = loader.save() {
        tracing::warn!("Failed to save commit-history cache: {}", e);
    }
    loader.close();

    print_log(&path, &revision, commits, json)
}

async fn run_serve(config: EngineConfig, repo: PathBuf, port: u16) -> anyhow::Result<()> {
    let loader = match CommitLoader::open(&repo, config) {
        Ok(l) => Arc::new(l),
        Err(e) => {
            eprintln!("✗ Failed to open repository: {}", e);
            eprintln!("  Path: {}", repo.display());
            std::process::exit(1);
        }
    };

    if let Err(e) = loader.warm_up(None) {
        tracing::warn!("Commit graph warm-up not started: {}", e);
    }

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::create_router(loader.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("127.0.0.1:{}", port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("✗ Failed to bind to port {}: {}", port, e);
            eprintln!("  Try a different port with --port <PORT>");
            std::process::exit(1);
        }
    };

    let info = loader.info();
    println!();
    println!("  Repository: {}", info.path);
    println!("  Identity:   {}", info.identity);
    if let Some(cache_file) = &info.cache_file {
        println!("  Cache:      {}", cache_file);
    }
    println!("  Server:     http://{}", addr);
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
        println!("\n  Shutting down...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    let saver = loader.clone();
    match tokio::task::spawn_blocking(move || saver.save()).await? {
        Ok(true) => println!("  Commit-history cache saved"),
        Ok(false) => {}
        Err(e) => eprintln!("  Warning: could not save commit-history cache: {}", e),
    }
    loader.close();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing (quieter for production)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = cli.engine_config();
    match cli.command {
        Commands::Log {
            repo,
            path,
            revision,
            json,
            no_cache,
        } => {
            tokio::task::spawn_blocking(move || run_log(config, repo, path, revision, json, no_cache))
                .await?
        }
        Commands::Serve { repo, port } => run_serve(config, repo, port).await,
    }
}
