//! Escalation state machine turning one fall event into a reminder stream.
//!
//! This module provides the [`EscalationEngine`], which owns the repeating
//! reminder timer and the session timeline of [`AlertRecord`]s.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;

use crate::escalation::record::AlertRecord;

/// Interval between reminder ticks when none is configured.
pub const DEFAULT_REMINDER_INTERVAL: Duration = Duration::from_secs(30);

/// Callback invoked with a clone of every appended [`AlertRecord`].
type RecordObserver = Arc<dyn Fn(AlertRecord) + Send + Sync>;

/// Mutable engine state, guarded by one lock so that triggers, reminder
/// ticks and acknowledgements never interleave.
struct EngineState {
    /// `true` while an unacknowledged fall alert is live.
    ///
    /// Invariant: `needs_attention` is `true` iff `reminder_task` is `Some`.
    needs_attention: bool,
    /// Handle of the single reminder timer task, owned only while the
    /// engine is in the attention state.
    reminder_task: Option<JoinHandle<()>>,
    /// Session-only timeline; never persisted.
    timeline: Vec<AlertRecord>,
}

impl EngineState {
    /// Cancel the owned reminder timer, if any.
    fn cancel_reminder(&mut self) {
        if let Some(handle) = self.reminder_task.take() {
            handle.abort();
        }
    }
}

/// State machine with states `{Idle, Attention}`.
///
/// A fall trigger moves the engine to `Attention`, appends a non-reminder
/// [`AlertRecord`] and (re)starts the reminder timer, cancelling any prior
/// timer first. While in `Attention`, the timer appends one reminder record
/// per interval. Acknowledging cancels the timer, appends an
/// "Acknowledged" record and returns to `Idle`; acknowledging while `Idle`
/// is a no-op.
///
/// # Thread Safety
///
/// All transitions are serialized behind an internal lock, so no transition
/// can interleave with another. At most one reminder timer is live at any
/// instant; re-entering `Attention` always replaces it.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use veille::escalation::EscalationEngine;
///
/// # async fn example() {
/// let engine = EscalationEngine::new(Duration::from_secs(30));
///
/// // A fall event arrives from the detector.
/// engine.trigger("Fall detected", "bedroom").await;
///
/// // The caregiver opens the app: the alert is acknowledged and the
/// // reminder stream stops.
/// engine.acknowledge().await;
/// # }
/// ```
pub struct EscalationEngine {
    /// Shared with the reminder timer task.
    state: Arc<Mutex<EngineState>>,
    /// Interval between reminder ticks.
    reminder_interval: Duration,
    /// Invoked with every appended record, outside the state lock.
    observer: Option<RecordObserver>,
}

impl EscalationEngine {
    /// Create an engine in the `Idle` state.
    ///
    /// # Arguments
    ///
    /// * `reminder_interval` - Time between reminder records while a fall
    ///   alert is unacknowledged. [`DEFAULT_REMINDER_INTERVAL`] in
    ///   production.
    pub fn new(reminder_interval: Duration) -> Self {
        EscalationEngine {
            state: Arc::new(Mutex::new(EngineState {
                needs_attention: false,
                reminder_task: None,
                timeline: Vec::new(),
            })),
            reminder_interval,
            observer: None,
        }
    }

    /// Attach an observer invoked with a clone of every appended record.
    ///
    /// The service uses this to forward records to the outbound
    /// notification channel. Observer failures are the observer's problem:
    /// the engine keeps ticking regardless.
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(AlertRecord) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Handle a fall trigger (external fall event or manual simulation).
    ///
    /// Transitions `Idle | Attention -> Attention`: appends one non-reminder
    /// record carrying the trigger's title and message, cancels any prior
    /// reminder timer and starts a new one. Re-triggering while already in
    /// `Attention` restarts the reminder cadence from now.
    pub async fn trigger(&self, title: &str, message: &str) {
        let record = AlertRecord::trigger(title, message);

        {
            let mut state = self.state.lock().await;

            // Replace, never stack: the previous timer dies before the new
            // one exists.
            state.cancel_reminder();
            state.needs_attention = true;
            state.timeline.push(record.clone());
            state.reminder_task = Some(self.spawn_reminder_task());
        }

        info!("fall trigger escalated: {title}");
        self.notify(record);
    }

    /// Acknowledge the live alert, if any.
    ///
    /// Transitions `Attention -> Idle`: cancels the reminder timer and
    /// appends one "Acknowledged" record. Idempotent: acknowledging while
    /// `Idle` changes no state and appends nothing.
    pub async fn acknowledge(&self) {
        let record = {
            let mut state = self.state.lock().await;
            if !state.needs_attention {
                debug!("acknowledge while idle, nothing to do");
                return;
            }

            state.cancel_reminder();
            state.needs_attention = false;

            let record = AlertRecord::acknowledged();
            state.timeline.push(record.clone());
            record
        };

        info!("fall alert acknowledged");
        self.notify(record);
    }

    /// Whether an unacknowledged fall alert is live.
    pub async fn needs_attention(&self) -> bool {
        self.state.lock().await.needs_attention
    }

    /// A clone of the current session timeline, oldest record first.
    pub async fn timeline(&self) -> Vec<AlertRecord> {
        self.state.lock().await.timeline.clone()
    }

    /// Clear the session timeline. Does not change the escalation state.
    pub async fn clear_timeline(&self) {
        self.state.lock().await.timeline.clear();
    }

    /// Spawn the reminder timer task for the current attention episode.
    ///
    /// The task appends one reminder record per interval for as long as the
    /// engine needs attention. It is cancelled by aborting the returned
    /// handle, which every transition out of (or back into) `Attention`
    /// does before releasing or replacing it.
    fn spawn_reminder_task(&self) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let observer = self.observer.clone();
        let interval = self.reminder_interval;

        tokio::spawn(async move {
            loop {
                time::sleep(interval).await;

                let record = {
                    let mut state = state.lock().await;
                    // The abort in cancel_reminder normally ends this task;
                    // the flag check keeps the invariant if the tick raced
                    // the cancellation.
                    if !state.needs_attention {
                        break;
                    }

                    let record = AlertRecord::reminder();
                    state.timeline.push(record.clone());
                    record
                };

                debug!("reminder tick, fall alert still unacknowledged");
                if let Some(observer) = &observer {
                    observer(record);
                }
            }
        })
    }

    /// Invoke the observer outside the state lock.
    fn notify(&self, record: AlertRecord) {
        if let Some(observer) = &self.observer {
            observer(record);
        }
    }
}

impl Drop for EscalationEngine {
    fn drop(&mut self) {
        // Teardown path: the timer must not outlive the engine.
        if let Ok(mut state) = self.state.try_lock() {
            state.cancel_reminder();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    /// Short interval so the scenarios run in milliseconds instead of the
    /// production 30 seconds.
    const TEST_INTERVAL: Duration = Duration::from_millis(50);

    fn reminder_count(timeline: &[AlertRecord]) -> usize {
        timeline.iter().filter(|r| r.is_reminder).count()
    }

    #[tokio::test]
    async fn test_trigger_moves_idle_to_attention() {
        let engine = EscalationEngine::new(TEST_INTERVAL);
        assert!(!engine.needs_attention().await);

        engine.trigger("Fall", "bedroom").await;

        assert!(engine.needs_attention().await);
        let timeline = engine.timeline().await;
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].title, "Fall");
        assert_eq!(timeline[0].message, "bedroom");
        assert!(!timeline[0].is_reminder);
    }

    #[tokio::test]
    async fn test_reminders_repeat_until_acknowledged() {
        let engine = EscalationEngine::new(TEST_INTERVAL);
        engine.trigger("Fall", "bedroom").await;

        // Two intervals and a half: ticks at 50ms and 100ms.
        sleep(Duration::from_millis(125)).await;

        let timeline = engine.timeline().await;
        assert_eq!(reminder_count(&timeline), 2);
        assert!(engine.needs_attention().await);
    }

    #[tokio::test]
    async fn test_acknowledge_before_first_tick_stops_reminders() {
        let engine = EscalationEngine::new(TEST_INTERVAL);
        engine.trigger("Fall", "bedroom").await;
        engine.acknowledge().await;

        assert!(!engine.needs_attention().await);

        // Two further intervals produce no reminder records.
        sleep(Duration::from_millis(125)).await;

        let timeline = engine.timeline().await;
        assert_eq!(reminder_count(&timeline), 0);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[1].title, "Acknowledged");
    }

    #[tokio::test]
    async fn test_acknowledge_is_idempotent() {
        let engine = EscalationEngine::new(TEST_INTERVAL);
        engine.trigger("Fall", "bedroom").await;

        engine.acknowledge().await;
        engine.acknowledge().await;

        let timeline = engine.timeline().await;
        let acknowledged = timeline
            .iter()
            .filter(|r| r.title == "Acknowledged")
            .count();
        assert_eq!(acknowledged, 1);
    }

    #[tokio::test]
    async fn test_acknowledge_while_idle_appends_nothing() {
        let engine = EscalationEngine::new(TEST_INTERVAL);

        engine.acknowledge().await;

        assert!(!engine.needs_attention().await);
        assert!(engine.timeline().await.is_empty());
    }

    #[tokio::test]
    async fn test_retrigger_replaces_the_reminder_timer() {
        let engine = EscalationEngine::new(Duration::from_millis(100));

        engine.trigger("Fall", "bedroom").await;
        sleep(Duration::from_millis(60)).await;

        // Re-trigger 60ms in: the old timer (due at 100ms) is cancelled and
        // the cadence restarts from now.
        engine.trigger("Fall", "kitchen").await;
        sleep(Duration::from_millis(60)).await;

        // 120ms after the first trigger but only 60ms after the second:
        // no reminder may have fired yet.
        assert_eq!(reminder_count(&engine.timeline().await), 0);

        sleep(Duration::from_millis(60)).await;
        assert_eq!(reminder_count(&engine.timeline().await), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_timer_is_live() {
        let engine = EscalationEngine::new(TEST_INTERVAL);

        // Idle: no timer, no attention.
        {
            let state = engine.state.lock().await;
            assert!(!state.needs_attention);
            assert!(state.reminder_task.is_none());
        }

        // Attention: exactly one timer, even after repeated triggers.
        engine.trigger("Fall", "a").await;
        engine.trigger("Fall", "b").await;
        engine.trigger("Fall", "c").await;
        {
            let state = engine.state.lock().await;
            assert!(state.needs_attention);
            assert!(state.reminder_task.is_some());
        }

        // Back to idle: the handle is released with the state flag.
        engine.acknowledge().await;
        {
            let state = engine.state.lock().await;
            assert!(!state.needs_attention);
            assert!(state.reminder_task.is_none());
        }
    }

    #[tokio::test]
    async fn test_observer_sees_every_record() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let engine = EscalationEngine::new(TEST_INTERVAL).with_observer(move |_record| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        engine.trigger("Fall", "bedroom").await;
        sleep(Duration::from_millis(75)).await; // one reminder tick
        engine.acknowledge().await;

        // Trigger + one reminder + acknowledgement.
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(engine.timeline().await.len(), 3);
    }

    #[tokio::test]
    async fn test_clear_timeline_keeps_state() {
        let engine = EscalationEngine::new(TEST_INTERVAL);
        engine.trigger("Fall", "bedroom").await;

        engine.clear_timeline().await;

        assert!(engine.timeline().await.is_empty());
        assert!(engine.needs_attention().await);
    }
}
