//! Command-line interface parsing for diskmemo
//!
//! This module handles parsing of CLI arguments using clap and turns the
//! global flags into a [`CacheConfig`].

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheConfig;

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// The URL does not use a scheme the HTTP client can fetch
    #[error("Invalid URL: '{0}'. Only http:// and https:// URLs are supported")]
    InvalidUrl(String),

    /// `--user-cache` was given but the platform has no per-user cache directory
    #[error("No per-user cache directory is available; pass --cache-dir instead")]
    NoUserCacheDir,
}

/// diskmemo - Fetch URLs through a persistent on-disk cache
#[derive(Parser, Debug)]
#[command(name = "diskmemo")]
#[command(about = "Memoize HTTP GET requests on disk with a time-to-live")]
#[command(version)]
pub struct Cli {
    /// Directory holding cache entries
    #[arg(long, global = true, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Use the per-user cache directory instead of the shared one in /tmp
    #[arg(long, global = true, conflicts_with = "cache_dir")]
    pub user_cache: bool,

    /// Seconds before an entry expires
    #[arg(long, global = true, value_name = "SECS")]
    pub max_age: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch a URL, reusing a cached response when one is still live
    Get {
        /// The URL to fetch
        url: String,
    },
    /// List cache entries and their age
    List,
    /// Delete expired and malformed entries
    Purge,
    /// Delete every cache entry
    Clear,
}

/// Checks that a URL can be handed to the HTTP client
///
/// # Returns
/// * `Ok(&str)` with the URL unchanged if it is http or https
/// * `Err(CliError::InvalidUrl)` otherwise
pub fn parse_url_arg(s: &str) -> Result<&str, CliError> {
    if s.starts_with("http://") || s.starts_with("https://") {
        Ok(s)
    } else {
        Err(CliError::InvalidUrl(s.to_string()))
    }
}

impl Cli {
    /// Builds the cache configuration from the global flags
    ///
    /// Flags that are absent keep the defaults from [`CacheConfig::default`].
    pub fn cache_config(&self) -> Result<CacheConfig, CliError> {
        let mut config = if self.user_cache {
            CacheConfig::user_cache().ok_or(CliError::NoUserCacheDir)?
        } else {
            CacheConfig::default()
        };
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(secs) = self.max_age {
            config.max_age = Duration::from_secs(secs);
        }
        Ok(config)
    }
}
