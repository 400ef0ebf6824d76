//! Escalation of fall alerts into a reminder stream.
//!
//! This module turns one fall event into repeating reminders until a
//! caregiver acknowledges it. It consists of two components:
//!
//! - [`AlertRecord`]: one entry of the session-only alerts timeline
//! - [`EscalationEngine`]: the `{Idle, Attention}` state machine owning the
//!   single reminder timer
//!
//! # Architecture
//!
//! The engine serializes all transitions behind one lock and owns at most
//! one reminder timer task at a time. The host application's lifecycle
//! observer calls [`EscalationEngine::acknowledge`] on every foreground
//! transition, making that the single recovery path after the process was
//! backgrounded during an active reminder stream.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use veille::escalation::{DEFAULT_REMINDER_INTERVAL, EscalationEngine};
//!
//! # async fn example() {
//! let engine = EscalationEngine::new(DEFAULT_REMINDER_INTERVAL)
//!     .with_observer(|record| println!("{}: {}", record.title, record.message));
//!
//! engine.trigger("Fall detected", "bedroom").await;
//! // ... reminders repeat every 30 seconds ...
//! engine.acknowledge().await;
//! # }
//! ```

mod engine;
mod record;

pub use crate::escalation::engine::{DEFAULT_REMINDER_INTERVAL, EscalationEngine};
pub use crate::escalation::record::AlertRecord;
