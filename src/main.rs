//! diskmemo - Fetch URLs through a persistent on-disk cache
//!
//! Thin command-line front end over the library: fetch a page (twice in a row
//! to see the cache at work) or inspect and tidy the cache directory.

use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use diskmemo::cache::{CacheConfig, Memoizer, Store};
use diskmemo::cli::{parse_url_arg, Cli, Command};
use diskmemo::fetch::PageClient;

/// Logs go to stderr; `RUST_LOG` overrides the default `warn` level
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn fetch(config: CacheConfig, url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = parse_url_arg(url)?;
    let client = PageClient::new(Memoizer::open(config)?)?;

    let start = Instant::now();
    let page = client.get(url).await?;
    let elapsed = start.elapsed();

    println!(
        "{} {} ({} bytes, {})",
        page.value.status,
        page.value.url,
        page.value.body.len(),
        if page.from_cache { "cached" } else { "fetched" }
    );
    println!("Fetched at: {}", page.value.fetched_at.to_rfc3339());
    println!("Time spent: {:?}", elapsed);
    Ok(())
}

fn list(config: CacheConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open(config)?;
    let now = store.now();
    let entries = store.entries()?;
    if entries.is_empty() {
        println!("No cache entries in {}", store.cache_dir().display());
        return Ok(());
    }
    for listed in entries {
        let age = now.signed_duration_since(listed.entry.created_at);
        println!(
            "{}  {}  {:>6}s  {}",
            listed.entry.fingerprint,
            listed.entry.created_at.to_rfc3339(),
            age.num_seconds(),
            if listed.expired { "expired" } else { "live" }
        );
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.cache_config()?;
    match &cli.command {
        Command::Get { url } => fetch(config, url).await?,
        Command::List => list(config)?,
        Command::Purge => {
            let removed = Store::open(config)?.purge_expired()?;
            println!("Removed {} stale entries", removed);
        }
        Command::Clear => {
            let removed = Store::open(config)?.clear()?;
            println!("Removed {} entries", removed);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
