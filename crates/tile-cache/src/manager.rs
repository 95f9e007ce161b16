//! Cache manager: store lifecycle, reads, writes and scheduled sweeps
//!
//! Only `init` reports failures to the caller. Everything else soft-fails:
//! `get` returns `None`, `set` returns `false`, a sweep tick is skipped, and
//! the error lands in the metrics' `last_error` slot.

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::store::TileStore;
use crate::strategy::HybridStrategy;
use crate::sweeper::Sweeper;
use crate::types::{CleanupReport, TileEntry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

struct Inner {
    config: CacheConfig,
    strategy: HybridStrategy,
    clock: Arc<dyn Clock>,
    store: RwLock<Option<TileStore>>,
    metrics: Metrics,
}

impl Inner {
    /// The open store; cleared again by `shutdown`
    async fn store(&self) -> Result<TileStore> {
        self.store
            .read()
            .await
            .clone()
            .ok_or(CacheError::NotInitialized)
    }

    async fn record_error(&self, err: &CacheError) {
        self.metrics.record_error(err, self.clock.now()).await;
    }

    async fn try_get(&self, tile_key: &str) -> Result<Option<serde_json::Value>> {
        let store = self.store().await?;
        let now = self.clock.now();

        let entry = {
            let mut tx = store.begin().await?;
            let entry = tx.get(tile_key).await?;
            tx.commit().await?;
            entry
        };

        // Stale rows stay in place until the next sweep
        let Some(mut entry) = entry.filter(|e| e.is_live(now)) else {
            self.metrics.record_miss();
            debug!(tile_key, "Cache miss");
            return Ok(None);
        };

        self.metrics.record_hit();
        debug!(tile_key, "Cache hit");

        entry.last_accessed = entry.last_accessed.max(now);
        let mut tx = store.begin().await?;
        tx.put(&entry).await?;
        tx.commit().await?;

        Ok(Some(entry.payload))
    }

    async fn try_set(&self, tile_key: &str, payload: serde_json::Value) -> Result<()> {
        let store = self.store().await?;
        let now = self.clock.now();
        let entry = TileEntry {
            tile_key: tile_key.to_string(),
            payload,
            last_accessed: now,
            expires: self.strategy.expires_at(now),
        };

        let mut tx = store.begin().await?;
        tx.put(&entry).await?;
        tx.commit().await?;
        debug!(tile_key, expires = %entry.expires, "Cached tile");
        Ok(())
    }

    async fn try_cleanup(&self) -> Result<CleanupReport> {
        let store = self.store().await?;
        let now = self.clock.now();

        let mut tx = store.begin().await?;
        let report = self.strategy.cleanup(&mut tx, now).await?;
        tx.commit().await?;
        Ok(report)
    }

    async fn perform_cleanup(&self) -> Option<CleanupReport> {
        match self.try_cleanup().await {
            Ok(report) => {
                info!(
                    expired = report.expired,
                    evicted = report.evicted,
                    remaining = report.remaining,
                    "Tile cache cleanup complete"
                );
                Some(report)
            }
            Err(err) => {
                self.record_error(&CacheError::Policy(Box::new(err))).await;
                None
            }
        }
    }
}

/// Persistent tile cache with TTL expiry and LRU capacity trimming
pub struct CacheManager {
    inner: Arc<Inner>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a manager that reads "now" from `clock`
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.version == 0 {
            return Err(CacheError::Config(
                "store version must be at least 1".to_string(),
            ));
        }
        if config.cleanup_interval.is_zero() {
            return Err(CacheError::Config(
                "cleanup interval must be non-zero".to_string(),
            ));
        }
        let strategy = HybridStrategy::new(config.max_items, config.max_age)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                strategy,
                clock,
                store: RwLock::new(None),
                metrics: Metrics::default(),
            }),
            sweeper: Mutex::new(None),
        })
    }

    /// Open (creating or upgrading) the store and start the periodic sweep
    ///
    /// Calling `init` again while the store is open does nothing; after
    /// `shutdown` it reopens the store.
    pub async fn init(&self) -> Result<()> {
        let config = &self.inner.config;
        {
            let mut slot = self.inner.store.write().await;
            if slot.is_none() {
                let opened = async {
                    tokio::fs::create_dir_all(&config.data_dir)
                        .await
                        .map_err(|e| CacheError::StoreOpen(Box::new(sqlx::Error::Io(e))))?;
                    TileStore::open(config.store_path(), config.version).await
                }
                .await;

                match opened {
                    Ok(store) => *slot = Some(store),
                    Err(err) => {
                        drop(slot);
                        self.inner.record_error(&err).await;
                        return Err(err);
                    }
                }
            }
        }

        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_none() {
            let inner = self.inner.clone();
            *sweeper = Some(Sweeper::start(config.cleanup_interval, move || {
                let inner = inner.clone();
                async move {
                    inner.perform_cleanup().await;
                }
            }));
            info!(
                name = %config.name,
                interval_secs = config.cleanup_interval.as_secs(),
                "Tile cache initialized"
            );
        }
        Ok(())
    }

    /// Look up a live tile; misses, stale entries and failures all yield `None`
    pub async fn get<T: DeserializeOwned>(&self, tile_key: &str) -> Option<T> {
        let decoded = match self.inner.try_get(tile_key).await {
            Ok(Some(payload)) => serde_json::from_value(payload).map_err(CacheError::from),
            Ok(None) => return None,
            Err(err) => Err(err),
        };

        match decoded {
            Ok(value) => Some(value),
            Err(err) => {
                self.inner.record_error(&err).await;
                None
            }
        }
    }

    /// Insert or replace a tile, returning whether it was stored
    pub async fn set<T: Serialize + ?Sized>(&self, tile_key: &str, payload: &T) -> bool {
        let result = match serde_json::to_value(payload) {
            Ok(value) => self.inner.try_set(tile_key, value).await,
            Err(err) => Err(err.into()),
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                self.inner.record_error(&err).await;
                false
            }
        }
    }

    /// Run one sweep now, outside the schedule
    pub async fn perform_cleanup(&self) -> Option<CleanupReport> {
        self.inner.perform_cleanup().await
    }

    /// Number of stored rows, stale ones included
    pub async fn entry_count(&self) -> Option<u64> {
        let counted = async {
            let mut tx = self.inner.store().await?.begin().await?;
            tx.count().await
        }
        .await;

        match counted {
            Ok(count) => Some(count),
            Err(err) => {
                self.inner.record_error(&err).await;
                None
            }
        }
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot().await
    }

    pub fn strategy(&self) -> &HybridStrategy {
        &self.inner.strategy
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.store.read().await.is_some()
    }

    pub async fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .await
            .as_ref()
            .map(Sweeper::is_running)
            .unwrap_or(false)
    }

    /// Stop the sweep, waiting for an in-flight tick, then close the store
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().await.take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
        let store = self.inner.store.write().await.take();
        if let Some(store) = store {
            store.close().await;
        }
        info!(name = %self.inner.config.name, "Tile cache shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn config(dir: &Path, max_items: u64, max_age: Duration) -> CacheConfig {
        CacheConfig {
            name: "tiles".to_string(),
            version: 1,
            data_dir: dir.to_path_buf(),
            max_items,
            max_age,
            cleanup_interval: Duration::from_secs(300),
        }
    }

    async fn manager(dir: &Path, max_items: u64) -> (CacheManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let manager = CacheManager::with_clock(
            config(dir, max_items, Duration::from_millis(1000)),
            clock.clone(),
        )
        .unwrap();
        manager.init().await.unwrap();
        (manager, clock)
    }

    async fn stored_entry(manager: &CacheManager, key: &str) -> Option<TileEntry> {
        let mut tx = manager.inner.store().await.unwrap().begin().await.unwrap();
        tx.get(key).await.unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let dir = tempdir().unwrap();

        let err = CacheManager::new(config(dir.path(), 0, Duration::from_secs(1)))
            .err()
            .unwrap();
        assert_eq!(err.code(), "ConfigError");

        let mut bad_version = config(dir.path(), 1, Duration::from_secs(1));
        bad_version.version = 0;
        assert!(CacheManager::new(bad_version).is_err());

        let mut bad_interval = config(dir.path(), 1, Duration::from_secs(1));
        bad_interval.cleanup_interval = Duration::ZERO;
        assert!(CacheManager::new(bad_interval).is_err());
    }

    #[tokio::test]
    async fn test_init_starts_sweeper_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path(), 10).await;
        assert!(manager.is_initialized().await);
        assert!(manager.is_sweeping().await);

        manager.init().await.unwrap();
        assert!(manager.is_sweeping().await);
        assert!(dir.path().join("tiles.sqlite").exists());

        manager.shutdown().await;
        assert!(!manager.is_sweeping().await);
    }

    #[tokio::test]
    async fn test_init_creates_data_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let manager = CacheManager::new(config(&nested, 10, Duration::from_secs(60))).unwrap();
        manager.init().await.unwrap();
        assert!(nested.join("tiles.sqlite").exists());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_init_failure_is_recorded() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let manager = CacheManager::new(config(&blocker, 10, Duration::from_secs(60))).unwrap();
        let err = manager.init().await.unwrap_err();
        assert_eq!(err.code(), "StoreOpenError");
        assert!(!manager.is_initialized().await);
        assert!(!manager.is_sweeping().await);

        let last = manager.metrics().await.last_error.unwrap();
        assert_eq!(last.code, "StoreOpenError");
    }

    #[tokio::test]
    async fn test_operations_before_init_soft_fail() {
        let dir = tempdir().unwrap();
        let manager = CacheManager::new(config(dir.path(), 10, Duration::from_secs(60))).unwrap();

        assert!(!manager.set("1/0/0", &json!({})).await);
        assert_eq!(manager.get::<serde_json::Value>("1/0/0").await, None);
        assert_eq!(manager.perform_cleanup().await, None);
        assert_eq!(manager.entry_count().await, None);

        let metrics = manager.metrics().await;
        assert_eq!(metrics.hits, 0);
        assert_eq!(metrics.misses, 0);
        assert_eq!(metrics.last_error.unwrap().code, "TransactionError");
    }

    #[tokio::test]
    async fn test_set_then_get_is_a_hit() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path(), 10).await;

        let tile = json!({"type": "FeatureCollection", "features": [{"id": 1}]});
        assert!(manager.set("12/2048/1361", &tile).await);

        let fetched: Option<serde_json::Value> = manager.get("12/2048/1361").await;
        assert_eq!(fetched, Some(tile));

        let metrics = manager.metrics().await;
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 0);
        assert_eq!(metrics.hit_rate, 1.0);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_computes_expiry() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path(), 10).await;

        assert!(manager.set("a", &json!(1)).await);
        let entry = stored_entry(&manager, "a").await.unwrap();
        assert_eq!(entry.last_accessed, start());
        assert_eq!(entry.expires, start() + ChronoDuration::milliseconds(1000));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_absent_key_is_a_miss() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path(), 10).await;

        assert_eq!(manager.get::<serde_json::Value>("nope").await, None);
        let metrics = manager.metrics().await;
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hit_rate, 0.0);
        assert!(metrics.last_error.is_none());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_but_not_deleted() {
        let dir = tempdir().unwrap();
        let (manager, clock) = manager(dir.path(), 10).await;

        assert!(manager.set("a", &json!("tile")).await);
        clock.advance(ChronoDuration::milliseconds(1000));

        assert_eq!(manager.get::<String>("a").await, None);
        assert_eq!(manager.metrics().await.misses, 1);

        let entry = stored_entry(&manager, "a").await.unwrap();
        assert_eq!(entry.last_accessed, start());
        assert_eq!(manager.entry_count().await, Some(1));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_hit_refreshes_last_accessed() {
        let dir = tempdir().unwrap();
        let (manager, clock) = manager(dir.path(), 10).await;

        assert!(manager.set("a", &json!("tile")).await);
        clock.advance(ChronoDuration::milliseconds(400));

        assert_eq!(manager.get::<String>("a").await, Some("tile".to_string()));
        let entry = stored_entry(&manager, "a").await.unwrap();
        assert_eq!(entry.last_accessed, start() + ChronoDuration::milliseconds(400));
        // A hit refreshes recency, not expiry
        assert_eq!(entry.expires, start() + ChronoDuration::milliseconds(1000));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_decode_failure_is_recorded() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path(), 10).await;

        assert!(manager.set("a", &json!({"not": "a number"})).await);
        assert_eq!(manager.get::<u32>("a").await, None);

        let metrics = manager.metrics().await;
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.last_error.unwrap().code, "TransactionError");
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_failure_after_shutdown() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path(), 10).await;
        manager.shutdown().await;

        assert!(!manager.set("a", &json!(1)).await);
        assert_eq!(manager.get::<u32>("a").await, None);
        let last = manager.metrics().await.last_error.unwrap();
        assert_eq!(last.code, "TransactionError");
        assert_eq!(last.time, start());
    }

    #[tokio::test]
    async fn test_init_after_shutdown_reopens_store() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path(), 10).await;
        assert!(manager.set("a", &json!(1)).await);

        manager.shutdown().await;
        assert!(!manager.is_initialized().await);
        assert!(!manager.is_sweeping().await);

        manager.init().await.unwrap();
        assert!(manager.is_initialized().await);
        assert!(manager.is_sweeping().await);
        assert!(manager.set("b", &json!(2)).await);
        assert_eq!(manager.get::<u32>("a").await, Some(1));
        assert_eq!(manager.entry_count().await, Some(2));
        assert!(manager.metrics().await.last_error.is_none());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_cleanup_before_init_records_policy_error() {
        let dir = tempdir().unwrap();
        let manager = CacheManager::new(config(dir.path(), 10, Duration::from_secs(60))).unwrap();

        assert_eq!(manager.perform_cleanup().await, None);
        let last = manager.metrics().await.last_error.unwrap();
        assert_eq!(last.code, "PolicyError");
        assert!(last.message.starts_with("Cleanup failed"));
    }

    #[tokio::test]
    async fn test_scheduled_sweep_trims_to_capacity() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let mut cfg = config(dir.path(), 2, Duration::from_secs(60));
        cfg.cleanup_interval = Duration::from_millis(50);
        let manager = CacheManager::with_clock(cfg, clock).unwrap();
        manager.init().await.unwrap();

        for key in ["a", "b", "c"] {
            assert!(manager.set(key, &json!(key)).await);
        }

        // No explicit perform_cleanup: only the sweeper may trim
        let mut count = manager.entry_count().await;
        for _ in 0..40 {
            if count == Some(2) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
            count = manager.entry_count().await;
        }
        assert_eq!(count, Some(2));
        assert_eq!(manager.get::<String>("a").await, None);
        assert_eq!(manager.get::<String>("c").await, Some("c".to_string()));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_perform_cleanup_trims_and_expires() {
        let dir = tempdir().unwrap();
        let (manager, clock) = manager(dir.path(), 2).await;

        for key in ["a", "b", "c"] {
            assert!(manager.set(key, &json!(key)).await);
        }
        assert_eq!(manager.entry_count().await, Some(3));

        let report = manager.perform_cleanup().await.unwrap();
        assert_eq!(report.expired, 0);
        assert_eq!(report.evicted, 1);
        assert_eq!(manager.entry_count().await, Some(2));

        clock.advance(ChronoDuration::milliseconds(1500));
        let report = manager.perform_cleanup().await.unwrap();
        assert_eq!(report.expired, 2);
        assert_eq!(manager.entry_count().await, Some(0));
        manager.shutdown().await;
    }
}
