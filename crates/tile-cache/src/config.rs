//! Cache configuration

use std::path::PathBuf;
use std::time::Duration;

/// Construction-time settings for a [`CacheManager`](crate::CacheManager)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Store name; the SQLite file is `<data_dir>/<name>.sqlite`
    pub name: String,
    /// Schema version; raising it runs the additive upgrade
    pub version: u32,
    pub data_dir: PathBuf,
    pub max_items: u64,
    pub max_age: Duration,
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "tile-cache".to_string(),
            version: 1,
            data_dir: PathBuf::from("./cache/tiles"),
            max_items: 100,
            max_age: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            cleanup_interval: Duration::from_secs(300),     // 5 minutes
        }
    }
}

impl CacheConfig {
    /// Load from `TILE_CACHE_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let name = std::env::var("TILE_CACHE_NAME").unwrap_or(defaults.name);

        let version = std::env::var("TILE_CACHE_VERSION")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.version);

        let data_dir = std::env::var("TILE_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let max_items = std::env::var("TILE_CACHE_MAX_ITEMS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.max_items);

        let max_age = std::env::var("TILE_CACHE_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_age);

        let cleanup_interval = std::env::var("TILE_CACHE_CLEANUP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.cleanup_interval);

        Self {
            name,
            version,
            data_dir,
            max_items,
            max_age,
            cleanup_interval,
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.sqlite", self.name))
    }
}
