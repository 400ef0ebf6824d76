//! Durable fall-event storage.
//!
//! This module provides the append-only event log of the service:
//!
//! - [`FallEvent`]: a stored fall event, created by [`EventStore::insert`]
//! - [`NewFallEvent`]: the insert payload
//! - [`EventStore`]: the SQLite-backed log with live range subscriptions
//! - [`StorageError`]: typed storage failures
//!
//! # Architecture
//!
//! The store keeps a registry of active range subscriptions. After every
//! successful insert it replays a fresh, fully-ordered snapshot to each
//! subscription whose range contains the inserted timestamp (a
//! level-triggered "latest state" feed, not a diff feed).
//!
//! # Example Usage
//!
//! ```no_run
//! use veille::store::{EventStore, NewFallEvent};
//! use chrono::{Duration, Utc};
//!
//! # async fn example() -> Result<(), veille::store::StorageError> {
//! let store = EventStore::open("fall_events.db")?;
//!
//! let now = Utc::now();
//! store.insert(NewFallEvent::at(now).with_location("Bedroom")).await?;
//!
//! // A history view typically watches a day at a time.
//! let mut day = store.watch_range(now - Duration::days(1), now).await?;
//! let snapshot = day.recv().await;
//! # Ok(())
//! # }
//! ```

mod event_store;
mod fall_event;

pub use crate::store::event_store::{EventStore, StorageError};
pub use crate::store::fall_event::{FallEvent, NewFallEvent};
