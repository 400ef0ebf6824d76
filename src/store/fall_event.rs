//! Durable fall-event records.
//!
//! This module provides the [`FallEvent`] struct persisted by the event store
//! and the [`NewFallEvent`] payload used to insert one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default value for [`FallEvent::source`] when the inserting side does not
/// name one. Events arriving over the push channel carry this source.
pub const DEFAULT_SOURCE: &str = "push";

/// A fall event as stored in the `fall_events` table.
///
/// Events are append-only: once inserted they are never mutated. The `id` is
/// assigned by the store and increases monotonically with insertion order.
///
/// # Examples
///
/// ```no_run
/// # use veille::store::FallEvent;
/// # fn show(event: &FallEvent) {
/// println!(
///     "fall #{} at {} ({})",
///     event.id,
///     event.occurred_at_utc,
///     event.location.as_deref().unwrap_or("unknown location"),
/// );
/// # }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallEvent {
    /// Store-assigned identifier, unique and monotonically increasing.
    pub id: i64,
    /// Absolute UTC timestamp of the fall.
    pub occurred_at_utc: DateTime<Utc>,
    /// Free-form location hint, e.g. "Living Room".
    pub location: Option<String>,
    /// Detector confidence in `0.0..=1.0`, when the detector reports one.
    pub confidence: Option<f64>,
    /// Origin of the event, defaults to [`DEFAULT_SOURCE`].
    pub source: String,
    /// Opaque JSON payload kept for forward-compatible diagnostics.
    pub meta_json: Option<String>,
}

/// Payload for inserting a new fall event.
///
/// Only the timestamp is required; every other field is optional and filled
/// with the documented defaults by the store.
///
/// # Examples
///
/// ```no_run
/// # use veille::store::NewFallEvent;
/// # use chrono::Utc;
/// let event = NewFallEvent::at(Utc::now())
///     .with_location("Living Room")
///     .with_confidence(0.87);
/// ```
#[derive(Clone, Debug)]
pub struct NewFallEvent {
    /// Absolute UTC timestamp of the fall.
    pub occurred_at_utc: DateTime<Utc>,
    /// Free-form location hint.
    pub location: Option<String>,
    /// Detector confidence in `0.0..=1.0`.
    pub confidence: Option<f64>,
    /// Origin of the event; [`DEFAULT_SOURCE`] when `None`.
    pub source: Option<String>,
    /// Opaque JSON payload for diagnostics.
    pub meta_json: Option<String>,
}

impl NewFallEvent {
    /// Create a payload for a fall that occurred at `occurred_at_utc`.
    ///
    /// The timestamp is truncated to the store's millisecond precision here,
    /// so the payload's `occurred_at_utc` is exactly what a later query
    /// returns.
    pub fn at(occurred_at_utc: DateTime<Utc>) -> Self {
        let millis = occurred_at_utc.timestamp_millis();
        let occurred_at_utc = DateTime::from_timestamp_millis(millis).unwrap_or(occurred_at_utc);

        NewFallEvent {
            occurred_at_utc,
            location: None,
            confidence: None,
            source: None,
            meta_json: None,
        }
    }

    /// Set the location hint.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the detector confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Override the event source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach an opaque JSON payload.
    pub fn with_meta_json(mut self, meta_json: impl Into<String>) -> Self {
        self.meta_json = Some(meta_json.into());
        self
    }

    /// The source to persist, falling back to [`DEFAULT_SOURCE`].
    pub fn source_or_default(&self) -> &str {
        self.source.as_deref().unwrap_or(DEFAULT_SOURCE)
    }
}
