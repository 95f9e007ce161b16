//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached tile payload with its access and expiry timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileEntry {
    pub tile_key: String,
    pub payload: serde_json::Value,
    pub last_accessed: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl TileEntry {
    /// Whether the entry is still servable at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires > now
    }
}

/// Outcome of one two-phase cleanup sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Entries removed by the TTL phase
    pub expired: u64,
    /// Entries removed by the LRU trim
    pub evicted: u64,
    /// Entries left after the sweep
    pub remaining: u64,
}

/// Convert a timestamp to the epoch milliseconds stored in the index columns
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Convert stored epoch milliseconds back to a timestamp
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
