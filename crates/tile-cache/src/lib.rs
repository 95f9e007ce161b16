//! Persistent map tile cache with TTL expiration and LRU eviction
//!
//! Tiles live in an embedded SQLite store indexed by expiry and last access.
//! A [`CacheManager`] serves reads and writes and runs a periodic sweep that
//! first drops expired tiles, then trims the least recently used ones down
//! to capacity.

pub mod clock;
mod config;
mod error;
mod manager;
mod metrics;
pub mod store;
mod strategy;
mod sweeper;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use manager::CacheManager;
pub use metrics::{ErrorRecord, MetricsSnapshot};
pub use store::{IndexCursor, TileIndex, TileStore, TileTransaction};
pub use strategy::HybridStrategy;
pub use sweeper::Sweeper;
pub use types::{CleanupReport, TileEntry};
