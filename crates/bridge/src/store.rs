// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-writer, on-disk event store backed by SQLite (§4.B).
//!
//! `raw_data` is encrypted at rest; every other column stays in the clear so
//! it can be queried directly. Access is serialized through a single
//! `rusqlite::Connection` guarded by a `tokio::sync::Mutex`, mirroring how
//! the teacher guards `MuxState` substructures with per-field locks.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::crypto::RawDataKey;
use crate::error::BridgeError;
use crate::event::{CanonicalEvent, EventType, RawValue};

/// One row of the durable store: a canonical event plus delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub row_id: i64,
    pub event: CanonicalEvent,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub sent_at: Option<SystemTime>,
    pub created_at: SystemTime,
}

/// Delivery status as surfaced by [`Store::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Pending,
    Failed,
}

/// Filter understood by `status` in [`QueryFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Sent,
    Pending,
    Failed,
}

/// Query parameters for [`Store::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub since: Option<SystemTime>,
    pub until: Option<SystemTime>,
    pub event_type: Option<EventType>,
    pub external_user_id: Option<String>,
    pub is_simulated: Option<bool>,
    pub status: Option<StatusFilter>,
    pub limit: usize,
    pub offset: usize,
}

/// A page of query results plus the total matching row count.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub rows: Vec<StoredEvent>,
    pub total: usize,
}

/// Aggregate statistics over the whole store (§4.B `stats()`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: u64,
    pub by_type: Vec<(String, u64)>,
    pub by_status: Vec<(String, u64)>,
    pub unique_users: u64,
    pub oldest: Option<SystemTime>,
    pub newest: Option<SystemTime>,
    pub avg_per_hour: f64,
    pub avg_per_day: f64,
    /// Event counts per hour bucket, oldest first, for the last 24h.
    pub by_hour: Vec<(SystemTime, u64)>,
    /// Event counts per day bucket, oldest first, for the last 30 days.
    pub by_day: Vec<(SystemTime, u64)>,
}

/// Criteria for bulk deletion via [`Store::clear`].
#[derive(Debug, Clone, Default)]
pub struct ClearCriteria {
    pub older_than: Option<Duration>,
    pub event_type: Option<EventType>,
    pub only_sent: bool,
    pub only_failed: bool,
}

/// The durable event store. One instance owns one SQLite file for the life
/// of the process (§5: "single-process ownership of its database").
pub struct Store {
    conn: Mutex<Connection>,
    key: RawDataKey,
    max_retries: u32,
}

impl Store {
    /// Open (creating if absent) the store at `path`, applying schema
    /// migrations idempotently.
    pub async fn open(path: impl AsRef<Path>, key: RawDataKey, max_retries: u32) -> Result<Self, BridgeError> {
        let path = path.as_ref().to_owned();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, BridgeError> {
            let conn = Connection::open(&path)
                .map_err(|e| BridgeError::Storage(format!("open store at {path:?}: {e}")))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| BridgeError::Storage(format!("apply schema: {e}")))?;
            Ok(conn)
        })
        .await
        .map_err(|e| BridgeError::Internal(format!("store open task panicked: {e}")))??;
        Ok(Self { conn: Mutex::new(conn), key, max_retries })
    }

    /// In-memory store, for tests.
    pub async fn open_in_memory(key: RawDataKey, max_retries: u32) -> Result<Self, BridgeError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BridgeError::Storage(format!("open in-memory store: {e}")))?;
        conn.execute_batch(SCHEMA).map_err(|e| BridgeError::Storage(format!("apply schema: {e}")))?;
        Ok(Self { conn: Mutex::new(conn), key, max_retries })
    }

    /// Persist a new event, returning its row id.
    pub async fn insert(&self, event: &CanonicalEvent) -> Result<i64, BridgeError> {
        let raw_blob = match &event.raw_data {
            Some(raw) => {
                let json = serde_json::to_vec(raw)
                    .map_err(|e| BridgeError::Internal(format!("serialize raw_data: {e}")))?;
                Some(self.key.encrypt(&json)?)
            }
            None => None,
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO events (
                event_id, external_user_id, timestamp, event_type, is_simulated,
                device_id, raw_data, retry_count, last_error, sent_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, NULL, ?8)",
            params![
                event.event_id,
                event.external_user_id,
                to_epoch_secs(event.timestamp),
                event.event_type.as_str(),
                event.is_simulated,
                event.device_id,
                raw_blob,
                to_epoch_secs(SystemTime::now()),
            ],
        )
        .map_err(|e| BridgeError::Storage(format!("insert event: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// Rows not yet sent and still under the retry ceiling, oldest first.
    pub async fn get_pending(&self, limit: usize) -> Result<Vec<StoredEvent>, BridgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT row_id, event_id, external_user_id, timestamp, event_type, is_simulated,
                        device_id, raw_data, retry_count, last_error, sent_at, created_at
                 FROM events
                 WHERE sent_at IS NULL AND retry_count < ?1
                 ORDER BY timestamp ASC
                 LIMIT ?2",
            )
            .map_err(|e| BridgeError::Storage(format!("prepare get_pending: {e}")))?;
        let rows = stmt
            .query_map(params![self.max_retries, limit as i64], |row| self.row_to_stored(row))
            .map_err(|e| BridgeError::Storage(format!("query get_pending: {e}")))?;
        self.collect_rows(rows)
    }

    /// Stamp `sent_at := now` for the given row ids. Idempotent.
    pub async fn mark_sent(&self, row_ids: &[i64]) -> Result<(), BridgeError> {
        if row_ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().await;
        let now = to_epoch_secs(SystemTime::now());
        for row_id in row_ids {
            conn.execute(
                "UPDATE events SET sent_at = ?1 WHERE row_id = ?2 AND sent_at IS NULL",
                params![now, row_id],
            )
            .map_err(|e| BridgeError::Storage(format!("mark_sent: {e}")))?;
        }
        Ok(())
    }

    /// Bump `retry_count` and record `last_error` for the given row ids.
    pub async fn increment_retry(&self, row_ids: &[i64], error_message: &str) -> Result<(), BridgeError> {
        if row_ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().await;
        for row_id in row_ids {
            conn.execute(
                "UPDATE events SET retry_count = retry_count + 1, last_error = ?1 WHERE row_id = ?2",
                params![error_message, row_id],
            )
            .map_err(|e| BridgeError::Storage(format!("increment_retry: {e}")))?;
        }
        Ok(())
    }

    /// Delete the `n` oldest rows regardless of state (FIFO capacity eviction).
    pub async fn evict_oldest(&self, n: usize) -> Result<u64, BridgeError> {
        if n == 0 {
            return Ok(0);
        }
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute(
                "DELETE FROM events WHERE row_id IN (
                    SELECT row_id FROM events ORDER BY timestamp ASC LIMIT ?1
                )",
                params![n as i64],
            )
            .map_err(|e| BridgeError::Storage(format!("evict_oldest: {e}")))?;
        Ok(deleted as u64)
    }

    /// Delete sent rows older than `age`.
    pub async fn cleanup(&self, age: Duration) -> Result<u64, BridgeError> {
        let conn = self.conn.lock().await;
        let cutoff = to_epoch_secs(SystemTime::now()) - age.as_secs() as i64;
        let deleted = conn
            .execute("DELETE FROM events WHERE sent_at IS NOT NULL AND sent_at < ?1", params![cutoff])
            .map_err(|e| BridgeError::Storage(format!("cleanup: {e}")))?;
        Ok(deleted as u64)
    }

    /// Count of rows not yet sent.
    pub async fn depth(&self) -> Result<u64, BridgeError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events WHERE sent_at IS NULL", [], |row| row.get(0))
            .map_err(|e| BridgeError::Storage(format!("depth: {e}")))?;
        Ok(count as u64)
    }

    /// Filtered, paginated, sorted query over the store (§4.B `query()`).
    pub async fn query(&self, filter: &QueryFilter) -> Result<QueryPage, BridgeError> {
        let conn = self.conn.lock().await;
        let (clause, args) = build_filter_clause(filter, self.max_retries);
        let count_sql = format!("SELECT COUNT(*) FROM events WHERE {clause}");
        let total: i64 = conn
            .query_row(&count_sql, rusqlite::params_from_iter(args.iter()), |row| row.get(0))
            .map_err(|e| BridgeError::Storage(format!("query count: {e}")))?;

        let select_sql = format!(
            "SELECT row_id, event_id, external_user_id, timestamp, event_type, is_simulated,
                    device_id, raw_data, retry_count, last_error, sent_at, created_at
             FROM events WHERE {clause}
             ORDER BY timestamp DESC
             LIMIT {} OFFSET {}",
            filter.limit.max(1),
            filter.offset
        );
        let mut stmt =
            conn.prepare(&select_sql).map_err(|e| BridgeError::Storage(format!("prepare query: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| self.row_to_stored(row))
            .map_err(|e| BridgeError::Storage(format!("query select: {e}")))?;
        let rows = self.collect_rows(rows)?;
        Ok(QueryPage { rows, total: total as usize })
    }

    /// Aggregate statistics (§4.B `stats()`).
    pub async fn stats(&self) -> Result<StoreStats, BridgeError> {
        let conn = self.conn.lock().await;
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .map_err(|e| BridgeError::Storage(format!("stats total: {e}")))?;
        let unique_users: i64 = conn
            .query_row("SELECT COUNT(DISTINCT external_user_id) FROM events", [], |row| row.get(0))
            .map_err(|e| BridgeError::Storage(format!("stats unique_users: {e}")))?;
        let oldest: Option<i64> = conn
            .query_row("SELECT MIN(timestamp) FROM events", [], |row| row.get(0))
            .map_err(|e| BridgeError::Storage(format!("stats oldest: {e}")))?;
        let newest: Option<i64> = conn
            .query_row("SELECT MAX(timestamp) FROM events", [], |row| row.get(0))
            .map_err(|e| BridgeError::Storage(format!("stats newest: {e}")))?;

        let mut by_type = Vec::new();
        let mut stmt = conn
            .prepare("SELECT event_type, COUNT(*) FROM events GROUP BY event_type")
            .map_err(|e| BridgeError::Storage(format!("stats by_type prepare: {e}")))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))
            .map_err(|e| BridgeError::Storage(format!("stats by_type query: {e}")))?;
        for r in rows {
            by_type.push(r.map_err(|e| BridgeError::Storage(format!("stats by_type row: {e}")))?);
        }

        let mut by_status = Vec::new();
        for (label, predicate) in
            [("sent", "sent_at IS NOT NULL"), ("pending", "sent_at IS NULL AND retry_count < ?1"), ("failed", "sent_at IS NULL AND retry_count >= ?1")]
        {
            let sql = format!("SELECT COUNT(*) FROM events WHERE {predicate}");
            let count: i64 = conn
                .query_row(&sql, params![self.max_retries], |row| row.get(0))
                .map_err(|e| BridgeError::Storage(format!("stats by_status {label}: {e}")))?;
            by_status.push((label.to_owned(), count as u64));
        }

        let (avg_per_hour, avg_per_day) = match (oldest, newest) {
            (Some(o), Some(n)) if n > o => {
                let span_hours = ((n - o) as f64 / 3600.0).max(1.0);
                let span_days = (span_hours / 24.0).max(1.0 / 24.0);
                (total as f64 / span_hours, total as f64 / span_days)
            }
            _ => (0.0, 0.0),
        };

        let now = to_epoch_secs(SystemTime::now());
        let by_hour = bucket_counts(&conn, now, 3600, 24)?;
        let by_day = bucket_counts(&conn, now, 86_400, 30)?;

        Ok(StoreStats {
            total: total as u64,
            by_type,
            by_status,
            unique_users: unique_users as u64,
            oldest: oldest.map(from_epoch_secs),
            newest: newest.map(from_epoch_secs),
            avg_per_hour,
            avg_per_day,
            by_hour,
            by_day,
        })
    }

    /// Bulk-delete rows matching `criteria` (§4.B `clear()`).
    pub async fn clear(&self, criteria: &ClearCriteria) -> Result<u64, BridgeError> {
        let conn = self.conn.lock().await;
        let mut clauses = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(age) = criteria.older_than {
            clauses.push("timestamp < ?".to_owned());
            let cutoff = to_epoch_secs(SystemTime::now()) - age.as_secs() as i64;
            args.push(Box::new(cutoff));
        }
        if let Some(ty) = criteria.event_type {
            clauses.push("event_type = ?".to_owned());
            args.push(Box::new(ty.as_str()));
        }
        if criteria.only_sent {
            clauses.push("sent_at IS NOT NULL".to_owned());
        }
        if criteria.only_failed {
            clauses.push("sent_at IS NULL AND retry_count >= ?".to_owned());
            args.push(Box::new(self.max_retries));
        }
        let where_clause = if clauses.is_empty() { "1=1".to_owned() } else { clauses.join(" AND ") };
        let sql = format!("DELETE FROM events WHERE {where_clause}");
        let deleted = conn
            .execute(&sql, rusqlite::params_from_iter(args.iter().map(|b| b.as_ref())))
            .map_err(|e| BridgeError::Storage(format!("clear: {e}")))?;
        Ok(deleted as u64)
    }

    fn row_to_stored(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEvent> {
        let raw_blob: Option<Vec<u8>> = row.get(7)?;
        let event_type_str: String = row.get(4)?;
        let event_type = EventType::parse(&event_type_str).unwrap_or(EventType::SystemEvent);
        let sent_at: Option<i64> = row.get(10)?;
        Ok(StoredEvent {
            row_id: row.get(0)?,
            event: CanonicalEvent {
                event_id: row.get(1)?,
                external_user_id: row.get(2)?,
                timestamp: from_epoch_secs(row.get(3)?),
                event_type,
                is_simulated: row.get(5)?,
                device_id: row.get(6)?,
                raw_data: raw_blob.and_then(|blob| {
                    self.key
                        .decrypt(&blob)
                        .ok()
                        .and_then(|plain| serde_json::from_slice::<std::collections::BTreeMap<String, RawValue>>(&plain).ok())
                }),
            },
            retry_count: row.get::<_, i64>(8)? as u32,
            last_error: row.get(9)?,
            sent_at: sent_at.map(from_epoch_secs),
            created_at: from_epoch_secs(row.get(11)?),
        })
    }

    fn collect_rows(
        &self,
        rows: impl Iterator<Item = rusqlite::Result<StoredEvent>>,
    ) -> Result<Vec<StoredEvent>, BridgeError> {
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| BridgeError::Storage(format!("collect rows: {e}")))
    }
}

fn build_filter_clause(filter: &QueryFilter, max_retries: u32) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(since) = filter.since {
        clauses.push("timestamp >= ?".to_owned());
        args.push(Box::new(to_epoch_secs(since)));
    }
    if let Some(until) = filter.until {
        clauses.push("timestamp <= ?".to_owned());
        args.push(Box::new(to_epoch_secs(until)));
    }
    if let Some(ty) = filter.event_type {
        clauses.push("event_type = ?".to_owned());
        args.push(Box::new(ty.as_str()));
    }
    if let Some(ref user) = filter.external_user_id {
        clauses.push("external_user_id = ?".to_owned());
        args.push(Box::new(user.clone()));
    }
    if let Some(sim) = filter.is_simulated {
        clauses.push("is_simulated = ?".to_owned());
        args.push(Box::new(sim));
    }
    match filter.status {
        Some(StatusFilter::Sent) => clauses.push("sent_at IS NOT NULL".to_owned()),
        Some(StatusFilter::Pending) => {
            clauses.push(format!("sent_at IS NULL AND retry_count < {max_retries}"));
        }
        Some(StatusFilter::Failed) => {
            clauses.push(format!("sent_at IS NULL AND retry_count >= {max_retries}"));
        }
        Some(StatusFilter::All) | None => {}
    }
    let clause = if clauses.is_empty() { "1=1".to_owned() } else { clauses.join(" AND ") };
    (clause, args)
}

/// Event counts for `bucket_count` trailing buckets of `bucket_secs` width,
/// ending at `now`, oldest first. Empty buckets are included as zero.
fn bucket_counts(
    conn: &Connection,
    now: i64,
    bucket_secs: i64,
    bucket_count: i64,
) -> Result<Vec<(SystemTime, u64)>, BridgeError> {
    let window_start = now - bucket_secs * bucket_count;
    let mut stmt = conn
        .prepare(
            "SELECT (timestamp - ?1) / ?2 AS bucket, COUNT(*)
             FROM events
             WHERE timestamp >= ?1
             GROUP BY bucket",
        )
        .map_err(|e| BridgeError::Storage(format!("stats bucket prepare: {e}")))?;
    let rows = stmt
        .query_map(params![window_start, bucket_secs], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u64))
        })
        .map_err(|e| BridgeError::Storage(format!("stats bucket query: {e}")))?;
    let mut counts = vec![0u64; bucket_count as usize];
    for r in rows {
        let (bucket, count) = r.map_err(|e| BridgeError::Storage(format!("stats bucket row: {e}")))?;
        if bucket >= 0 && (bucket as usize) < counts.len() {
            counts[bucket as usize] = count;
        }
    }
    Ok(counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| (from_epoch_secs(window_start + i as i64 * bucket_secs), count))
        .collect())
}

fn to_epoch_secs(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn from_epoch_secs(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs((-secs) as u64)
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT,
    external_user_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    is_simulated INTEGER NOT NULL,
    device_id TEXT NOT NULL,
    raw_data BLOB,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    sent_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events (timestamp);
CREATE INDEX IF NOT EXISTS idx_events_sent_at ON events (sent_at);
";

impl StoredEvent {
    /// Current delivery status, the implicit `retry_count >= max_retries` →
    /// failed rule made explicit (§9 Design Notes).
    pub fn status(&self, max_retries: u32) -> DeliveryStatus {
        if self.sent_at.is_some() {
            DeliveryStatus::Sent
        } else if self.retry_count >= max_retries {
            DeliveryStatus::Failed
        } else {
            DeliveryStatus::Pending
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
