//! Content-addressed item store.
//!
//! Items are keyed by their content hash; a second insert with the same hash
//! is a no-op. The delivery queue is the set of rows with `delivered = 0`,
//! ranked by score, then publication time. Errors from the pipeline and the
//! scheduler go to an append-only `errors` table.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::canonical::CanonicalItem;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("store connection lock poisoned")]
    Poisoned,
}

/// A persisted item. `item` never changes after insert; only `delivered` flips.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub id: i64,
    pub item: CanonicalItem,
    pub delivered: bool,
}

/// One row of the error audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub id: i64,
    pub when: DateTime<Utc>,
    pub component: String,
    pub message: String,
}

/// Persistence seam shared by the ingestion pipeline and the delivery job.
pub trait ItemStore: Send + Sync {
    /// Persist `item` unless its hash is already known. Returns whether a row was created.
    fn insert_if_absent(&self, item: &CanonicalItem) -> Result<bool, StoreError>;

    /// Up to `limit` undelivered items with `score >= min_score`, best first.
    fn select_next_batch(&self, min_score: f64, limit: usize)
        -> Result<Vec<StoredItem>, StoreError>;

    /// Flag an item as delivered. Repeated calls are harmless.
    fn mark_delivered(&self, id: i64) -> Result<(), StoreError>;

    /// Append to the error audit trail. Never fails.
    fn log_error(&self, component: &str, message: &str);
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    summary TEXT NOT NULL,
    published_at INTEGER NOT NULL,
    tags TEXT NOT NULL DEFAULT '',
    hash TEXT NOT NULL UNIQUE,
    score REAL NOT NULL DEFAULT 0,
    delivered INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    when_ts INTEGER NOT NULL,
    component TEXT NOT NULL,
    message TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_items_delivered ON items(delivered);
"#;

const ITEM_COLUMNS: &str =
    "id, source, title, url, summary, published_at, tags, hash, score, delivered";

/// Wait for a database lock held by another process before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store. One connection behind a mutex; a single writer is assumed.
///
/// Calls are synchronous and run on the caller's thread, async passes
/// included. Each is a single indexed statement; only a lock held by a
/// second process makes one block, for up to `BUSY_TIMEOUT`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn get_by_hash(&self, hash: &str) -> Result<Option<StoredItem>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE hash = ?1");
        let item = conn.query_row(&sql, [hash], row_to_item).optional()?;
        Ok(item)
    }

    pub fn count_items(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(1) FROM items", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    /// Newest error events first. Diagnostics only; the pipeline never reads these.
    pub fn recent_errors(&self, limit: usize) -> Result<Vec<ErrorEvent>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, when_ts, component, message FROM errors ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit_param(limit)], |row| {
            let when: i64 = row.get(1)?;
            Ok(ErrorEvent {
                id: row.get(0)?,
                when: DateTime::from_timestamp(when, 0).unwrap_or_default(),
                component: row.get(2)?,
                message: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<StoredItem> {
    let published: i64 = row.get(5)?;
    Ok(StoredItem {
        id: row.get(0)?,
        item: CanonicalItem {
            source: row.get(1)?,
            title: row.get(2)?,
            url: row.get(3)?,
            summary: row.get(4)?,
            published_at: DateTime::from_timestamp(published, 0).unwrap_or_default(),
            tags: row.get(6)?,
            hash: row.get(7)?,
            score: row.get(8)?,
        },
        delivered: row.get(9)?,
    })
}

impl ItemStore for SqliteStore {
    fn insert_if_absent(&self, item: &CanonicalItem) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT INTO items (source, title, url, summary, published_at, tags, hash, score, delivered)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)
             ON CONFLICT(hash) DO NOTHING",
            params![
                item.source,
                item.title,
                item.url,
                item.summary,
                item.published_at.timestamp(),
                item.tags,
                item.hash,
                item.score,
            ],
        )?;
        Ok(changed == 1)
    }

    fn select_next_batch(
        &self,
        min_score: f64,
        limit: usize,
    ) -> Result<Vec<StoredItem>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE delivered = 0 AND score >= ?1
             ORDER BY score DESC, published_at DESC
             LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![min_score, limit_param(limit)], row_to_item)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn mark_delivered(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute("UPDATE items SET delivered = 1 WHERE id = ?1", [id])?;
        Ok(())
    }

    fn log_error(&self, component: &str, message: &str) {
        tracing::warn!(component, message, "error event");
        let res = self.conn().and_then(|conn| {
            conn.execute(
                "INSERT INTO errors (when_ts, component, message) VALUES (?1, ?2, ?3)",
                params![Utc::now().timestamp(), component, message],
            )
            .map_err(StoreError::from)
        });
        if let Err(e) = res {
            tracing::warn!(error = %e, component, "failed to record error event");
        }
    }
}
