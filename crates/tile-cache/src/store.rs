//! SQLite-backed tile store
//!
//! One `tile_cache` table keyed by `tile_key`, with ascending indexes over
//! `expires` and `last_accessed`. Timestamps are persisted as epoch
//! milliseconds. The schema version lives in `PRAGMA user_version`.

use crate::error::{CacheError, Result};
use crate::types::{from_millis, to_millis, TileEntry};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{FromRow, Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Secondary indexes available for ordered iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileIndex {
    Expires,
    LastAccessed,
}

impl TileIndex {
    fn column(self) -> &'static str {
        match self {
            TileIndex::Expires => "expires",
            TileIndex::LastAccessed => "last_accessed",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct TileRow {
    tile_key: String,
    payload: String,
    last_accessed: i64,
    expires: i64,
}

impl TileRow {
    fn index_value(&self, index: TileIndex) -> i64 {
        match index {
            TileIndex::Expires => self.expires,
            TileIndex::LastAccessed => self.last_accessed,
        }
    }

    fn into_entry(self) -> Result<TileEntry> {
        Ok(TileEntry {
            payload: serde_json::from_str(&self.payload)?,
            tile_key: self.tile_key,
            last_accessed: from_millis(self.last_accessed),
            expires: from_millis(self.expires),
        })
    }
}

/// Handle to an opened tile store
#[derive(Debug, Clone)]
pub struct TileStore {
    pool: SqlitePool,
    path: PathBuf,
    version: u32,
}

impl TileStore {
    /// Open or create the store at `path`, upgrading its schema to `version`
    pub async fn open(path: impl AsRef<Path>, version: u32) -> Result<Self> {
        if version == 0 {
            return Err(CacheError::Config(
                "store version must be at least 1".to_string(),
            ));
        }

        let path = path.as_ref().to_path_buf();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        // A single connection serializes transactions, one at a time
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| CacheError::StoreOpen(Box::new(e)))?;

        let store = Self {
            pool,
            path,
            version,
        };
        if let Err(e) = store.upgrade().await {
            store.pool.close().await;
            return Err(e.into_open_error());
        }

        info!(path = ?store.path, version, "Tile store opened");
        Ok(store)
    }

    async fn upgrade(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let found: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&mut *tx)
            .await?;
        let found = u32::try_from(found).unwrap_or(0);

        if found > self.version {
            return Err(CacheError::Version {
                found,
                requested: self.version,
            });
        }
        if found == self.version {
            return Ok(());
        }

        info!(from = found, to = self.version, "Upgrading tile store schema");
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tile_cache (
                tile_key TEXT PRIMARY KEY NOT NULL,
                payload TEXT NOT NULL,
                last_accessed INTEGER NOT NULL,
                expires INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS tile_cache_last_accessed ON tile_cache (last_accessed, tile_key)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS tile_cache_expires ON tile_cache (expires, tile_key)",
        )
        .execute(&mut *tx)
        .await?;
        // PRAGMA arguments cannot be bound
        sqlx::query(&format!("PRAGMA user_version = {}", self.version))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Start a new transaction; dropping it without `commit` rolls it back
    pub async fn begin(&self) -> Result<TileTransaction> {
        let tx = self.pool.begin().await?;
        Ok(TileTransaction { tx })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub async fn close(&self) {
        self.pool.close().await;
        debug!(path = ?self.path, "Tile store closed");
    }
}

/// A unit of work against the tile table
pub struct TileTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl TileTransaction {
    /// Point lookup by primary key
    pub async fn get(&mut self, tile_key: &str) -> Result<Option<TileEntry>> {
        let row: Option<TileRow> = sqlx::query_as(
            "SELECT tile_key, payload, last_accessed, expires FROM tile_cache WHERE tile_key = ?1",
        )
        .bind(tile_key)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(TileRow::into_entry).transpose()
    }

    /// Insert or replace the record for `entry.tile_key`
    pub async fn put(&mut self, entry: &TileEntry) -> Result<()> {
        let payload = serde_json::to_string(&entry.payload)?;
        sqlx::query(
            r#"
            INSERT INTO tile_cache (tile_key, payload, last_accessed, expires)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (tile_key) DO UPDATE SET
                payload = excluded.payload,
                last_accessed = excluded.last_accessed,
                expires = excluded.expires
            "#,
        )
        .bind(&entry.tile_key)
        .bind(payload)
        .bind(to_millis(entry.last_accessed))
        .bind(to_millis(entry.expires))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Delete by primary key, returning whether a record was removed
    pub async fn delete(&mut self, tile_key: &str) -> Result<bool> {
        delete_row(&mut *self.tx, tile_key).await
    }

    pub async fn count(&mut self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tile_cache")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Open an ascending cursor over `index`, optionally bounded above (inclusive)
    pub async fn open_cursor(
        &mut self,
        index: TileIndex,
        upper_bound: Option<DateTime<Utc>>,
    ) -> Result<IndexCursor<'_>> {
        let mut cursor = IndexCursor {
            conn: &mut *self.tx,
            index,
            upper_bound: upper_bound.map(to_millis),
            current: None,
            position: None,
        };
        cursor.fetch_next().await?;
        Ok(cursor)
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn delete_row(conn: &mut SqliteConnection, tile_key: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM tile_cache WHERE tile_key = ?1")
        .bind(tile_key)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Resumable ordered cursor over one secondary index
///
/// Stepping resumes strictly after the last visited `(index value, tile_key)`,
/// so deleting the current record never skips or repeats a neighbour.
pub struct IndexCursor<'t> {
    conn: &'t mut SqliteConnection,
    index: TileIndex,
    upper_bound: Option<i64>,
    current: Option<TileRow>,
    position: Option<(i64, String)>,
}

impl IndexCursor<'_> {
    /// Key of the record under the cursor, `None` once exhausted
    pub fn key(&self) -> Option<&str> {
        self.current.as_ref().map(|row| row.tile_key.as_str())
    }

    pub fn is_exhausted(&self) -> bool {
        self.current.is_none()
    }

    /// Decode the record under the cursor
    pub fn entry(&self) -> Result<Option<TileEntry>> {
        self.current.clone().map(TileRow::into_entry).transpose()
    }

    /// Delete the record under the cursor; the cursor keeps its position
    pub async fn delete(&mut self) -> Result<bool> {
        match &self.current {
            Some(row) => delete_row(self.conn, &row.tile_key).await,
            None => Ok(false),
        }
    }

    /// Step to the next record; returns `false` once the range is exhausted
    pub async fn advance(&mut self) -> Result<bool> {
        if self.current.is_none() {
            return Ok(false);
        }
        self.fetch_next().await
    }

    async fn fetch_next(&mut self) -> Result<bool> {
        let column = self.index.column();
        let row: Option<TileRow> = match &self.position {
            None => {
                let sql = format!(
                    "SELECT tile_key, payload, last_accessed, expires FROM tile_cache \
                     WHERE (?1 IS NULL OR {column} <= ?1) \
                     ORDER BY {column}, tile_key LIMIT 1"
                );
                sqlx::query_as(&sql)
                    .bind(self.upper_bound)
                    .fetch_optional(&mut *self.conn)
                    .await?
            }
            Some((value, key)) => {
                let sql = format!(
                    "SELECT tile_key, payload, last_accessed, expires FROM tile_cache \
                     WHERE (?1 IS NULL OR {column} <= ?1) \
                     AND ({column} > ?2 OR ({column} = ?2 AND tile_key > ?3)) \
                     ORDER BY {column}, tile_key LIMIT 1"
                );
                sqlx::query_as(&sql)
                    .bind(self.upper_bound)
                    .bind(*value)
                    .bind(key.as_str())
                    .fetch_optional(&mut *self.conn)
                    .await?
            }
        };

        self.position = row
            .as_ref()
            .map(|r| (r.index_value(self.index), r.tile_key.clone()));
        self.current = row;
        Ok(self.current.is_some())
    }
}
