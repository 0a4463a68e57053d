//! Cache configuration
//!
//! A `CacheConfig` is fixed when a store is opened; changing it means opening
//! a new store.

use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

/// Default directory shared by every memoized call
pub const DEFAULT_CACHE_DIR: &str = "/tmp/cache_decorator/";

/// Default time-to-live for entries (42 minutes)
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(42 * 60);

/// Where entries live and how long they stay fresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Directory holding the `.cache` files
    pub cache_dir: PathBuf,
    /// Entries whose age reaches this value are expired
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration for a custom directory with the default TTL
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Per-user alternative to the shared `/tmp` directory
    ///
    /// Resolves to the platform cache location for `diskmemo`, which is
    /// `$XDG_CACHE_HOME/diskmemo` on Linux. `None` without a home directory.
    pub fn user_cache() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "diskmemo")?;
        Some(Self::new(project_dirs.cache_dir()))
    }

    /// Replaces the time-to-live
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}
