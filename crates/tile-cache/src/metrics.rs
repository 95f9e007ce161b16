//! Hit/miss counters and the last recorded error

use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::error;

/// The most recent failure caught by the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub time: DateTime<Utc>,
    pub message: String,
    pub code: String,
}

/// Point-in-time view of the cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub last_error: Option<ErrorRecord>,
}

#[derive(Debug, Default)]
pub struct Metrics {
    hits: AtomicU64,
    misses: AtomicU64,
    last_error: RwLock<Option<ErrorRecord>>,
}

impl Metrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Store `err` as the last error and log it
    pub async fn record_error(&self, err: &CacheError, time: DateTime<Utc>) {
        error!(code = err.code(), error = %err, "Cache error");
        let record = ErrorRecord {
            time,
            message: err.to_string(),
            code: err.code().to_string(),
        };
        *self.last_error.write().await = Some(record);
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };

        MetricsSnapshot {
            hits,
            misses,
            hit_rate,
            last_error: self.last_error.read().await.clone(),
        }
    }
}
