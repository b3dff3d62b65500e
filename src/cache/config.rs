//! Cache configuration.
//!
//! Controls the request cache via the `[cache]` section of `nutrisync.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_TTL_SECS: u64 = 60;
const DEFAULT_MAX_ENTRIES: usize = 512;
const DEFAULT_VOLATILE_PATHS: [&str; 4] = ["/search", "/callback", "/statistics", "/unread_count"];

/// Request cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve GET responses from the cache at all.
    pub enabled: bool,
    /// Maximum age (seconds) at which a stored response may still be served.
    pub ttl_seconds: u64,
    /// Upper bound on stored responses; least recently used entries go first.
    pub max_entries: usize,
    /// Path fragments that are never cached (search, OAuth callback, statistics, counters).
    pub volatile_paths: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: DEFAULT_TTL_SECS,
            max_entries: DEFAULT_MAX_ENTRIES,
            volatile_paths: DEFAULT_VOLATILE_PATHS
                .iter()
                .map(|path| (*path).to_string())
                .collect(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl_seconds: settings.ttl.as_secs(),
            max_entries: settings.max_entries.get(),
            volatile_paths: settings.volatile_paths.clone(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// True when responses for `path` must always come from the network.
    pub fn is_volatile(&self, path: &str) -> bool {
        self.volatile_paths
            .iter()
            .any(|fragment| !fragment.is_empty() && path.contains(fragment.as_str()))
    }
}
