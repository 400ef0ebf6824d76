//! Service layer wiring the push channel, the escalation engine and the
//! event store together.
//!
//! # Architecture
//!
//! The [`Service`] owns three collaborators:
//!
//! - a [`PushChannel`] subscribed to the alert server's stream
//! - an [`EscalationEngine`] escalating each fall into a reminder stream
//! - an [`EventStore`] persisting every fall event
//!
//! Inbound frames are queued into an unbounded channel with a single
//! consumer task, so falls are persisted and escalated in arrival order
//! even though the WebSocket callback itself is synchronous. Outbound
//! alert records flow through a second queue drained by
//! [`Service::forward_alerts`]; a failed push is logged and dropped, it
//! never stops the reminder stream.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::channel::{ConnectionConfig, DEFAULT_PRIORITY, Notifier, PushChannel};
use crate::escalation::{AlertRecord, EscalationEngine};
use crate::store::{EventStore, FallEvent, NewFallEvent, StorageError};

/// Title used when an inbound frame carries none, and for simulated falls.
pub const FALL_TITLE: &str = "Fall detected";

/// Message used for simulated falls without a location.
pub const SIMULATED_MESSAGE: &str = "Simulated fall";

/// Source persisted for manually simulated falls.
pub const MANUAL_SOURCE: &str = "manual";

/// Fall-alert service coordinating ingestion, escalation and persistence.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use veille::channel::{ConnectionConfig, GotifySender};
/// use veille::service::Service;
/// use veille::store::EventStore;
///
/// # async fn example() -> Result<(), veille::store::StorageError> {
/// let store = EventStore::open("./data/fall_events.db")?;
/// let sender = GotifySender::new("https://push.example.com", "app-token");
/// let service = Arc::new(Service::new(sender, store, Duration::from_secs(30)));
///
/// let outbound = Arc::clone(&service);
/// tokio::spawn(async move { outbound.forward_alerts().await });
///
/// service
///     .connect(&ConnectionConfig::new("https://push.example.com", "app-token"))
///     .await;
/// # Ok(())
/// # }
/// ```
pub struct Service<N: Notifier> {
    /// Outbound push client.
    notifier: N,
    /// Escalation state machine, shared with the inbound consumer task.
    engine: Arc<EscalationEngine>,
    /// Durable fall-event log, shared with the inbound consumer task.
    store: Arc<EventStore>,
    /// Inbound subscription to the alert server.
    channel: Mutex<PushChannel>,
    /// Queue of alert records waiting to be pushed, taken once by
    /// [`Service::forward_alerts`].
    outbound: Mutex<Option<UnboundedReceiver<AlertRecord>>>,
}

impl<N: Notifier> Service<N> {
    /// Create a new [`Service`].
    ///
    /// # Arguments
    ///
    /// * `notifier` - Outbound push client for alert records.
    /// * `store` - Fall-event store.
    /// * `reminder_interval` - Time between escalation reminders.
    pub fn new(notifier: N, store: EventStore, reminder_interval: Duration) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let engine = EscalationEngine::new(reminder_interval).with_observer(move |record| {
            // The receiver only goes away on shutdown.
            let _ = outbound_tx.send(record);
        });

        Service {
            notifier,
            engine: Arc::new(engine),
            store: Arc::new(store),
            channel: Mutex::new(PushChannel::new()),
            outbound: Mutex::new(Some(outbound_rx)),
        }
    }

    /// Drain the outbound queue, pushing every alert record to the alert
    /// server.
    ///
    /// Runs until the service is dropped. A failed push is logged and the
    /// record dropped; the escalation engine keeps reminding regardless.
    /// Call this once from a dedicated task; later calls return immediately.
    pub async fn forward_alerts(&self) {
        let Some(mut outbound) = self.outbound.lock().await.take() else {
            warn!("outbound queue already taken");
            return;
        };

        while let Some(record) = outbound.recv().await {
            if let Err(error) = self
                .notifier
                .send(&record.title, &record.message, DEFAULT_PRIORITY)
                .await
            {
                warn!("failed to push alert record \"{}\": {error}", record.title);
            }
        }
    }

    /// Subscribe to the alert server with the given credentials.
    ///
    /// Replaces any previous subscription, so calling this again applies new
    /// settings. A disconnected config only tears the subscription down.
    /// There is no automatic reconnection: a lost subscription is logged and
    /// the service stays offline until reconnected explicitly.
    pub async fn connect(&self, config: &ConnectionConfig) {
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Map<String, Value>>();

        // Single consumer keeps falls in arrival order.
        let engine = Arc::clone(&self.engine);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                handle_frame(&engine, &store, frame).await;
            }
        });

        self.channel.lock().await.connect(
            config,
            move |frame| {
                let _ = frame_tx.send(frame);
            },
            |error| warn!("alert server subscription lost: {error}"),
        );
    }

    /// Tear down the alert server subscription. Idempotent.
    pub async fn disconnect(&self) {
        self.channel.lock().await.disconnect();
    }

    /// Whether the inbound subscription is currently up.
    pub async fn is_connected(&self) -> bool {
        self.channel.lock().await.is_connected()
    }

    /// Simulate a fall, as if the detector had reported one.
    ///
    /// The event is persisted with source [`MANUAL_SOURCE`] and escalated
    /// like any detector fall. A persistence failure is returned to the
    /// caller but does not stop the escalation.
    pub async fn simulate_fall(&self, location: Option<&str>) -> Result<i64, StorageError> {
        info!("simulating a fall");

        let mut event = NewFallEvent::at(Utc::now()).with_source(MANUAL_SOURCE);
        if let Some(location) = location {
            event = event.with_location(location);
        }

        let persisted = self.store.insert(event).await;
        if let Err(error) = &persisted {
            warn!("failed to persist simulated fall: {error}");
        }

        self.engine
            .trigger(FALL_TITLE, location.unwrap_or(SIMULATED_MESSAGE))
            .await;
        persisted
    }

    /// Acknowledge the live fall alert, stopping the reminder stream.
    /// Idempotent.
    pub async fn acknowledge(&self) {
        self.engine.acknowledge().await;
    }

    /// Whether an unacknowledged fall alert is live.
    pub async fn needs_attention(&self) -> bool {
        self.engine.needs_attention().await
    }

    /// The session timeline of alert records, oldest first.
    pub async fn timeline(&self) -> Vec<AlertRecord> {
        self.engine.timeline().await
    }

    /// Clear the session timeline.
    pub async fn clear_timeline(&self) {
        self.engine.clear_timeline().await;
    }

    /// Subscribe to live snapshots of the fall events in `[start, end)`.
    ///
    /// See [`EventStore::watch_range`].
    pub async fn watch_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UnboundedReceiver<Vec<FallEvent>>, StorageError> {
        self.store.watch_range(start, end).await
    }

    /// Disconnect from the alert server and close the event store.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.channel.lock().await.disconnect();
        self.store.close().await;
    }
}

/// Persist and escalate one inbound frame.
///
/// Missing fields fall back to defaults: the title to [`FALL_TITLE`], the
/// timestamp to now, the source to the store's push default. The full frame
/// is kept as the event's meta payload. A persistence failure is logged and
/// the escalation proceeds anyway.
async fn handle_frame(engine: &EscalationEngine, store: &EventStore, frame: Map<String, Value>) {
    let title = frame
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or(FALL_TITLE)
        .to_owned();
    let message = frame
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_owned();
    let occurred_at = frame
        .get("date")
        .and_then(Value::as_str)
        .and_then(|date| DateTime::parse_from_rfc3339(date).ok())
        .map(|date| date.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let mut event = NewFallEvent::at(occurred_at);
    if let Some(location) = frame.get("location").and_then(Value::as_str) {
        event = event.with_location(location);
    }
    if let Some(confidence) = frame.get("confidence").and_then(Value::as_f64) {
        event = event.with_confidence(confidence);
    }
    event = event.with_meta_json(Value::Object(frame).to_string());

    match store.insert(event).await {
        Ok(id) => debug!("persisted fall event #{id}"),
        Err(error) => warn!("failed to persist fall event: {error}"),
    }

    engine.trigger(&title, &message).await;
}
