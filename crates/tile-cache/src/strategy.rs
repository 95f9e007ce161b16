//! Hybrid TTL + LRU eviction
//!
//! A sweep runs two phases inside one transaction:
//!
//! 1. every entry whose `expires` is at or before `now` is deleted, walking the
//!    `expires` index in ascending order;
//! 2. if more than `max_items` entries remain, the surplus is deleted walking the
//!    `last_accessed` index from the oldest access.
//!
//! Expired entries go first so capacity is only charged to live tiles.

use crate::error::{CacheError, Result};
use crate::store::{TileIndex, TileTransaction};
use crate::types::CleanupReport;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HybridStrategy {
    max_items: u64,
    max_age: chrono::Duration,
}

impl HybridStrategy {
    /// `max_age` is kept at millisecond resolution and must be at least 1ms
    pub fn new(max_items: u64, max_age: Duration) -> Result<Self> {
        if max_items == 0 {
            return Err(CacheError::Config(
                "max_items must be at least 1".to_string(),
            ));
        }
        let millis = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        if millis == 0 {
            return Err(CacheError::Config(
                "max_age must be at least one millisecond".to_string(),
            ));
        }
        let max_age = chrono::Duration::try_milliseconds(millis).ok_or_else(|| {
            CacheError::Config(format!("max_age of {}ms is out of range", millis))
        })?;

        Ok(Self { max_items, max_age })
    }

    pub fn max_items(&self) -> u64 {
        self.max_items
    }

    pub fn max_age(&self) -> chrono::Duration {
        self.max_age
    }

    /// Expiry for an entry written or refreshed at `now`
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.max_age)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Run both phases against `tx`; the caller commits
    pub async fn cleanup(
        &self,
        tx: &mut TileTransaction,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport> {
        let mut expired = 0u64;
        {
            let mut cursor = tx.open_cursor(TileIndex::Expires, Some(now)).await?;
            while !cursor.is_exhausted() {
                if cursor.delete().await? {
                    expired += 1;
                }
                cursor.advance().await?;
            }
        }

        let count = tx.count().await?;
        let mut evicted = 0u64;
        if count > self.max_items {
            let delete_count = count - self.max_items;
            let mut cursor = tx.open_cursor(TileIndex::LastAccessed, None).await?;
            while evicted < delete_count && !cursor.is_exhausted() {
                if cursor.delete().await? {
                    evicted += 1;
                }
                cursor.advance().await?;
            }
        }

        let report = CleanupReport {
            expired,
            evicted,
            remaining: count - evicted,
        };
        debug!(
            expired = report.expired,
            evicted = report.evicted,
            remaining = report.remaining,
            "Cleanup sweep finished"
        );
        Ok(report)
    }
}
