// ABOUTME: Entry point for the notecache binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and runs one command against the render store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use notecache::{App, NotecacheConfig};
use notecache_core::event::{CacheEvent, EventKind};

#[derive(Parser, Debug)]
#[command(name = "notecache")]
#[command(about = "Versioned, incrementally synced cache of markdown note excerpts")]
#[command(version)]
struct Cli {
    /// Data directory holding the SQLite store (overrides NOTECACHE_HOME)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Markdown vault to index (overrides NOTECACHE_VAULT)
    #[arg(long)]
    vault: Option<PathBuf>,

    /// Schema version of the cached values (overrides NOTECACHE_SCHEMA_VERSION)
    #[arg(long)]
    schema_version: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile the cache with the vault and persist it
    Sync,
    /// List cached keys with their modification times
    List,
    /// Print the cached entry for one note as JSON
    Show {
        /// Note key, relative to the vault root
        key: String,
    },
    /// Print cache and durable store statistics as JSON
    Stats,
    /// Remove every cached record, keeping the schema version
    Clear,
    /// Remove the durable store contents and its schema version
    Drop,
    /// Drop everything and rebuild from the vault
    Reinit,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("notecache=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = NotecacheConfig::from_env().context("invalid configuration")?;
    if let Some(home) = cli.home {
        config.home = home;
    }
    if let Some(vault) = cli.vault {
        config.vault = Some(vault);
    }
    if let Some(version) = cli.schema_version {
        anyhow::ensure!(version > 0, "--schema-version must be greater than zero");
        config.schema_version = version;
    }

    let notifier = App::notifier(&config);
    let mut progress = notifier.on(EventKind::Progress);
    let app = App::open_with(config, notifier)?;
    let reporter = tokio::spawn(async move {
        while let Some(event) = progress.recv().await {
            if let CacheEvent::Progress(p) = event {
                tracing::debug!(phase = %p.phase, processed = p.processed, total = p.total, "progress");
            }
        }
    });

    app.cache.wait_ready().await?;
    let result = run(&app, cli.command).await;

    app.shutdown().await?;
    reporter.abort();
    result
}

async fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Sync => {
            app.cache.flush().await?;
            let stats = app.stats().await?;
            println!("synced {} notes", stats.entries);
        }
        Command::List => {
            let mut entries = app.cache.all_entries().await;
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (key, record) in entries {
                println!("{}\t{}", record.mtime, key);
            }
        }
        Command::Show { key } => {
            let entry = app
                .cache
                .get_value(&key)
                .await
                .with_context(|| format!("no cached entry for {key}"))?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Command::Stats => {
            let stats = app.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Clear => {
            app.cache.clear_database().await?;
            println!("cleared {}", app.cache.name());
        }
        Command::Drop => {
            app.cache.drop_database().await?;
            println!("dropped {}", app.cache.name());
        }
        Command::Reinit => {
            let report = app.cache.reinitialize_database().await?;
            app.cache.flush().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
