//! Durable, queryable log of fall events.
//!
//! This module provides the [`EventStore`], an append-only SQLite-backed log
//! with live, time-bounded range subscriptions. Every successful insert whose
//! timestamp falls inside an open range re-delivers a fresh, fully-ordered
//! snapshot to each subscriber of that range.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::{Connection, params};
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::store::fall_event::{FallEvent, NewFallEvent};

/// Schema of the single `fall_events` table.
///
/// Timestamps are UTC unix milliseconds so range comparisons stay plain
/// integer comparisons.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS fall_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    occurred_at_utc INTEGER NOT NULL,
    location TEXT,
    confidence REAL,
    source TEXT NOT NULL DEFAULT 'push',
    meta_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_fall_events_occurred_at
    ON fall_events(occurred_at_utc DESC);
";

/// Failures raised by the event store.
///
/// Storage faults are propagated to the caller awaiting the operation and
/// never abort escalation: a failed persist must not stop the reminder
/// stream.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store was closed; later inserts and queries fail with this.
    #[error("event store is closed")]
    Closed,
    /// Underlying SQLite failure (disk full, corruption, ...).
    #[error("sqlite failure: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Confidence outside the valid `0.0..=1.0` range.
    #[error("confidence {0} is outside 0.0..=1.0")]
    InvalidConfidence(f64),
    /// A stored timestamp could not be interpreted as UTC milliseconds.
    #[error("stored timestamp {0} is not a valid UTC millisecond value")]
    InvalidTimestamp(i64),
}

/// One live range subscription.
///
/// The subscriber holds the receiving half; the store drops the entry as
/// soon as a delivery fails because the receiver is gone.
struct RangeSubscription {
    /// Inclusive lower bound on `occurred_at_utc`.
    start: DateTime<Utc>,
    /// Exclusive upper bound on `occurred_at_utc`.
    end: DateTime<Utc>,
    /// Delivers full snapshots, most recent event first.
    tx: UnboundedSender<Vec<FallEvent>>,
}

impl RangeSubscription {
    /// Millisecond comparison, matching the stored column and the snapshot
    /// query bounds.
    fn contains(&self, occurred_at: DateTime<Utc>) -> bool {
        let millis = occurred_at.timestamp_millis();
        self.start.timestamp_millis() <= millis && millis < self.end.timestamp_millis()
    }
}

/// Connection plus watcher registry, present only while the store is open.
struct StoreInner {
    conn: Connection,
    watchers: Vec<RangeSubscription>,
}

/// Durable, append-only log of [`FallEvent`]s.
///
/// The store serializes writes behind a single lock (single-writer
/// discipline) and keeps a registry of active range subscriptions. Each
/// snapshot delivered to a subscriber is produced by one query, so a
/// subscriber never observes a partially-applied insert.
///
/// # Examples
///
/// ```no_run
/// # use veille::store::{EventStore, NewFallEvent};
/// # use chrono::{Duration, Utc};
/// # async fn example() -> Result<(), veille::store::StorageError> {
/// let store = EventStore::open("/var/lib/veille/fall_events.db")?;
///
/// let now = Utc::now();
/// let id = store.insert(NewFallEvent::at(now)).await?;
/// println!("stored fall event #{id}");
///
/// let mut history = store.watch_range(now - Duration::days(1), now + Duration::days(1)).await?;
/// while let Some(snapshot) = history.recv().await {
///     println!("{} events in the last day", snapshot.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct EventStore {
    /// `None` once [`EventStore::close`] ran.
    inner: Mutex<Option<StoreInner>>,
}

impl EventStore {
    /// Open (or create) the store backing file at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the SQLite file, usually
    ///   [`crate::utils::db_path`] under the service data directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Sqlite`] when the file cannot be opened or
    /// the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a transient in-memory store. Used by tests.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;

        Ok(EventStore {
            inner: Mutex::new(Some(StoreInner {
                conn,
                watchers: Vec::new(),
            })),
        })
    }

    /// Append a new fall event and return its store-assigned id.
    ///
    /// Every open range subscription containing the event's timestamp
    /// receives a fresh full snapshot after the row is written.
    ///
    /// # Errors
    ///
    /// * [`StorageError::InvalidConfidence`] when the confidence is outside
    ///   `0.0..=1.0`.
    /// * [`StorageError::Closed`] after [`EventStore::close`].
    /// * [`StorageError::Sqlite`] on underlying write failure.
    pub async fn insert(&self, event: NewFallEvent) -> Result<i64, StorageError> {
        if let Some(confidence) = event.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(StorageError::InvalidConfidence(confidence));
            }
        }

        let mut guard = self.inner.lock().await;
        let inner = guard.as_mut().ok_or(StorageError::Closed)?;

        inner.conn.execute(
            "INSERT INTO fall_events (occurred_at_utc, location, confidence, source, meta_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.occurred_at_utc.timestamp_millis(),
                event.location,
                event.confidence,
                event.source_or_default(),
                event.meta_json,
            ],
        )?;
        let id = inner.conn.last_insert_rowid();

        info!(
            "stored fall event #{} from source {} at {}",
            id,
            event.source_or_default(),
            event.occurred_at_utc
        );

        // The row is durably written at this point. A failed snapshot
        // delivery must not turn the insert into an error.
        if let Err(error) = inner.notify_watchers(event.occurred_at_utc) {
            warn!("failed to refresh range subscriptions: {error}");
        }

        Ok(id)
    }

    /// Subscribe to the events with `start <= occurred_at_utc < end`.
    ///
    /// The returned receiver immediately yields the current snapshot, then a
    /// fresh full snapshot after every insert inside the range, ordered by
    /// `occurred_at_utc` descending (most recent first). Dropping the
    /// receiver ends the subscription; re-subscribing with the same bounds
    /// reproduces the same semantics from the current store state.
    ///
    /// Multiple subscriptions with overlapping ranges are supported
    /// concurrently.
    ///
    /// # Errors
    ///
    /// * [`StorageError::Closed`] after [`EventStore::close`].
    /// * [`StorageError::Sqlite`] when the initial snapshot query fails.
    pub async fn watch_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UnboundedReceiver<Vec<FallEvent>>, StorageError> {
        let mut guard = self.inner.lock().await;
        let inner = guard.as_mut().ok_or(StorageError::Closed)?;

        let (tx, rx) = mpsc::unbounded_channel();

        // Initial snapshot so the subscriber starts from the current state.
        let snapshot = query_range(&inner.conn, start, end)?;
        let _ = tx.send(snapshot);

        debug!("new range subscription [{start}, {end})");
        inner.watchers.push(RangeSubscription { start, end, tx });

        Ok(rx)
    }

    /// Release the underlying storage resources.
    ///
    /// Idempotent: closing an already-closed store does nothing. Open
    /// subscriptions end (their receivers yield `None`); later `insert` and
    /// `watch_range` calls fail with [`StorageError::Closed`].
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        if guard.take().is_some() {
            info!("event store closed");
        }
    }
}

impl StoreInner {
    /// Re-deliver a fresh snapshot to every subscription containing
    /// `occurred_at`, dropping subscriptions whose receiver is gone.
    fn notify_watchers(&mut self, occurred_at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut index = 0;
        while index < self.watchers.len() {
            if !self.watchers[index].contains(occurred_at) {
                index += 1;
                continue;
            }

            let watcher = &self.watchers[index];
            let snapshot = query_range(&self.conn, watcher.start, watcher.end)?;
            if watcher.tx.send(snapshot).is_ok() {
                index += 1;
            } else {
                debug!(
                    "dropping closed range subscription [{}, {})",
                    watcher.start, watcher.end
                );
                self.watchers.remove(index);
            }
        }

        Ok(())
    }
}

/// Query one ordered snapshot of the range `start <= occurred_at_utc < end`.
fn query_range(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<FallEvent>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT id, occurred_at_utc, location, confidence, source, meta_json
         FROM fall_events
         WHERE occurred_at_utc >= ?1 AND occurred_at_utc < ?2
         ORDER BY occurred_at_utc DESC, id DESC",
    )?;

    let rows = stmt.query_map(
        params![start.timestamp_millis(), end.timestamp_millis()],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        },
    )?;

    let mut events = Vec::new();
    for row in rows {
        let (id, millis, location, confidence, source, meta_json) = row?;
        let occurred_at_utc = DateTime::from_timestamp_millis(millis)
            .ok_or(StorageError::InvalidTimestamp(millis))?;

        events.push(FallEvent {
            id,
            occurred_at_utc,
            location,
            confidence,
            source,
            meta_json,
        });
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    fn timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[tokio::test]
    async fn test_insert_returns_monotonic_ids() {
        let store = EventStore::in_memory().unwrap();

        let first = store.insert(NewFallEvent::at(Utc::now())).await.unwrap();
        let second = store.insert(NewFallEvent::at(Utc::now())).await.unwrap();

        assert!(second > first);
    }

    #[tokio::test]
    async fn test_insert_and_watch_round_trip() {
        let store = EventStore::in_memory().unwrap();
        let occurred = timestamp(1_700_000_000_000);

        let id = store
            .insert(
                NewFallEvent::at(occurred)
                    .with_location("Living Room")
                    .with_confidence(0.87),
            )
            .await
            .unwrap();

        let mut rx = store
            .watch_range(occurred - Duration::days(1), occurred + Duration::days(1))
            .await
            .unwrap();

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);

        let event = &snapshot[0];
        assert_eq!(event.id, id);
        assert_eq!(event.occurred_at_utc, occurred);
        assert_eq!(event.location.as_deref(), Some("Living Room"));
        assert_eq!(event.confidence, Some(0.87));
        assert_eq!(event.source, "push");
        assert_eq!(event.meta_json, None);
    }

    #[tokio::test]
    async fn test_event_inserted_now_round_trips_exactly() {
        let store = EventStore::in_memory().unwrap();

        // Utc::now() carries sub-millisecond precision; the payload is
        // canonicalized so the stored timestamp compares equal to it.
        let event = NewFallEvent::at(Utc::now());
        let occurred = event.occurred_at_utc;
        store.insert(event).await.unwrap();

        let mut rx = store
            .watch_range(occurred, occurred + Duration::milliseconds(1))
            .await
            .unwrap();
        let snapshot = rx.recv().await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].occurred_at_utc, occurred);
    }

    #[tokio::test]
    async fn test_watch_range_bounds_are_half_open() {
        let store = EventStore::in_memory().unwrap();
        let start = timestamp(1_000);
        let end = timestamp(2_000);

        // Exactly at the start: included.
        store.insert(NewFallEvent::at(start)).await.unwrap();
        // Strictly inside.
        store
            .insert(NewFallEvent::at(timestamp(1_500)))
            .await
            .unwrap();
        // Exactly at the end: excluded.
        store.insert(NewFallEvent::at(end)).await.unwrap();

        let mut rx = store.watch_range(start, end).await.unwrap();
        let snapshot = rx.recv().await.unwrap();

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|e| e.occurred_at_utc < end));
        assert!(snapshot.iter().any(|e| e.occurred_at_utc == start));
    }

    #[tokio::test]
    async fn test_snapshots_are_ordered_most_recent_first() {
        let store = EventStore::in_memory().unwrap();

        store
            .insert(NewFallEvent::at(timestamp(1_000)))
            .await
            .unwrap();
        store
            .insert(NewFallEvent::at(timestamp(3_000)))
            .await
            .unwrap();
        store
            .insert(NewFallEvent::at(timestamp(2_000)))
            .await
            .unwrap();

        let mut rx = store
            .watch_range(timestamp(0), timestamp(10_000))
            .await
            .unwrap();
        let snapshot = rx.recv().await.unwrap();

        let millis: Vec<i64> = snapshot
            .iter()
            .map(|e| e.occurred_at_utc.timestamp_millis())
            .collect();
        assert_eq!(millis, vec![3_000, 2_000, 1_000]);
    }

    #[tokio::test]
    async fn test_watchers_get_fresh_snapshot_on_in_range_insert() {
        let store = EventStore::in_memory().unwrap();

        let mut rx = store
            .watch_range(timestamp(0), timestamp(10_000))
            .await
            .unwrap();
        assert!(rx.recv().await.unwrap().is_empty());

        store
            .insert(NewFallEvent::at(timestamp(5_000)))
            .await
            .unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);

        store
            .insert(NewFallEvent::at(timestamp(6_000)))
            .await
            .unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_insert_does_not_notify() {
        let store = EventStore::in_memory().unwrap();

        let mut rx = store
            .watch_range(timestamp(0), timestamp(1_000))
            .await
            .unwrap();
        assert!(rx.recv().await.unwrap().is_empty());

        store
            .insert(NewFallEvent::at(timestamp(5_000)))
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_overlapping_subscriptions_are_independent() {
        let store = EventStore::in_memory().unwrap();

        let mut wide = store
            .watch_range(timestamp(0), timestamp(10_000))
            .await
            .unwrap();
        let mut narrow = store
            .watch_range(timestamp(4_000), timestamp(6_000))
            .await
            .unwrap();
        wide.recv().await.unwrap();
        narrow.recv().await.unwrap();

        store
            .insert(NewFallEvent::at(timestamp(5_000)))
            .await
            .unwrap();
        assert_eq!(wide.recv().await.unwrap().len(), 1);
        assert_eq!(narrow.recv().await.unwrap().len(), 1);

        store
            .insert(NewFallEvent::at(timestamp(9_000)))
            .await
            .unwrap();
        assert_eq!(wide.recv().await.unwrap().len(), 2);
        assert!(narrow.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscription_is_restartable() {
        let store = EventStore::in_memory().unwrap();
        store
            .insert(NewFallEvent::at(timestamp(5_000)))
            .await
            .unwrap();

        let mut rx = store
            .watch_range(timestamp(0), timestamp(10_000))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 1);
        drop(rx);

        // Re-issuing the same bounds starts from the current store state.
        let mut rx = store
            .watch_range(timestamp(0), timestamp(10_000))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let store = EventStore::in_memory().unwrap();

        let rx = store
            .watch_range(timestamp(0), timestamp(10_000))
            .await
            .unwrap();
        drop(rx);

        // The next in-range insert must not fail on the dead subscription.
        store
            .insert(NewFallEvent::at(timestamp(5_000)))
            .await
            .unwrap();

        let guard = store.inner.lock().await;
        assert!(guard.as_ref().unwrap().watchers.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_failure_does_not_fail_the_write() {
        let store = EventStore::in_memory().unwrap();
        let mut rx = store
            .watch_range(timestamp(0), timestamp(10_000))
            .await
            .unwrap();
        rx.recv().await.unwrap();

        // Swap in a table without the id column: inserts still succeed but
        // the snapshot query does not.
        {
            let mut guard = store.inner.lock().await;
            guard
                .as_mut()
                .unwrap()
                .conn
                .execute_batch(
                    "DROP TABLE fall_events;
                     CREATE TABLE fall_events (
                         occurred_at_utc INTEGER NOT NULL,
                         location TEXT,
                         confidence REAL,
                         source TEXT NOT NULL DEFAULT 'push',
                         meta_json TEXT
                     );",
                )
                .unwrap();
        }

        let id = store.insert(NewFallEvent::at(timestamp(5_000))).await;
        assert!(id.is_ok());
    }

    #[tokio::test]
    async fn test_confidence_is_validated() {
        let store = EventStore::in_memory().unwrap();

        let too_high = store
            .insert(NewFallEvent::at(Utc::now()).with_confidence(1.5))
            .await;
        assert!(matches!(
            too_high,
            Err(StorageError::InvalidConfidence(c)) if c == 1.5
        ));

        let negative = store
            .insert(NewFallEvent::at(Utc::now()).with_confidence(-0.1))
            .await;
        assert!(matches!(negative, Err(StorageError::InvalidConfidence(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_later_calls() {
        let store = EventStore::in_memory().unwrap();
        let mut rx = store
            .watch_range(timestamp(0), timestamp(10_000))
            .await
            .unwrap();
        rx.recv().await.unwrap();

        store.close().await;
        store.close().await;

        // Open subscriptions end when the store closes.
        assert!(rx.recv().await.is_none());

        let insert = store.insert(NewFallEvent::at(Utc::now())).await;
        assert!(matches!(insert, Err(StorageError::Closed)));

        let watch = store.watch_range(timestamp(0), timestamp(1)).await;
        assert!(matches!(watch, Err(StorageError::Closed)));
    }

    #[tokio::test]
    async fn test_events_survive_reopen() {
        let file = NamedTempFile::new().unwrap();
        let occurred = timestamp(1_700_000_000_000);

        {
            let store = EventStore::open(file.path()).unwrap();
            store
                .insert(NewFallEvent::at(occurred).with_source("manual"))
                .await
                .unwrap();
            store.close().await;
        }

        let store = EventStore::open(file.path()).unwrap();
        let mut rx = store
            .watch_range(occurred - Duration::days(1), occurred + Duration::days(1))
            .await
            .unwrap();

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].source, "manual");
    }
}
