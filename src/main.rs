//! Work-item cache maintenance CLI
//!
//! Inspects and manages the on-disk cache shared with the tools that embed
//! the library.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workitem_cache::{CacheConfig, CacheManager, Category};

#[derive(Debug, Parser)]
#[command(name = "workitem-cache", version, about = "Manage the local work-item cache")]
struct Cli {
    /// Cache directory (defaults to WORKITEM_CACHE_DIR or the platform cache dir)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print usage statistics as JSON
    Stats,
    /// Delete every cached entry and the access log
    Clear,
    /// Print a cached value as JSON
    Get { category: Category, key: String },
    /// Store a JSON value
    Set {
        category: Category,
        key: String,
        /// Value as a JSON document
        value: String,
        /// TTL in seconds (defaults to the configured max age)
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// List the most accessed keys of the last 24 hours
    Hot {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

/// Entry point for the cache maintenance CLI.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber (stderr) for logging
/// 2. Load configuration from environment variables, then CLI overrides
/// 3. Initialize the cache and run the command
/// 4. Drain background preload work before exit
#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workitem_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = CacheConfig::from_env();
    if let Some(dir) = cli.dir {
        config = config.with_cache_dir(dir);
    }
    info!(
        "Configuration loaded: cache_dir={}, max_age={}s, max_size={}",
        config.cache_dir.display(),
        config.max_age.as_secs(),
        config.max_size
    );

    let cache = CacheManager::new(config);
    cache
        .init()
        .await
        .context("failed to initialize cache directory")?;

    let code = run(&cache, cli.command).await;
    cache.shutdown().await;
    code
}

async fn run(cache: &CacheManager, command: Command) -> Result<ExitCode> {
    match command {
        Command::Stats => {
            let stats = cache.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Clear => {
            cache.clear().await.context("failed to clear cache")?;
            println!("cache cleared");
        }
        Command::Get { category, key } => match cache.get::<Value>(&key, category).await {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => {
                eprintln!("{}:{} not cached", category, key);
                return Ok(ExitCode::FAILURE);
            }
        },
        Command::Set {
            category,
            key,
            value,
            ttl,
        } => {
            let value: Value = serde_json::from_str(&value).context("value is not valid JSON")?;
            cache
                .set(&key, &value, category, ttl.map(Duration::from_secs))
                .await
                .with_context(|| format!("failed to store {}:{}", category, key))?;
            println!("stored {}:{}", category, key);
        }
        Command::Hot { limit } => {
            for (name, count) in cache.most_accessed(limit).await {
                println!("{:>6}  {}", count, name);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
