//! Session-only alert records.

use chrono::{DateTime, Utc};

/// Title used for reminder records.
pub const REMINDER_TITLE: &str = "Reminder";
/// Message used for reminder records.
pub const REMINDER_MESSAGE: &str = "A fall alert is still waiting for acknowledgement";
/// Title used for acknowledgement records.
pub const ACKNOWLEDGED_TITLE: &str = "Acknowledged";
/// Message used for acknowledgement records.
pub const ACKNOWLEDGED_MESSAGE: &str = "The fall alert was acknowledged";

/// One entry of the in-memory alerts timeline.
///
/// Records live only in the session timeline and are never persisted. The
/// durable history is the event store, not this timeline.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertRecord {
    /// When the record was appended.
    pub time: DateTime<Utc>,
    /// Short headline, e.g. "Fall detected".
    pub title: String,
    /// Longer description, e.g. the fall location.
    pub message: String,
    /// `true` for the repeating reminder entries, `false` for the initial
    /// trigger and the acknowledgement.
    pub is_reminder: bool,
}

impl AlertRecord {
    /// Record appended when a fall trigger arrives.
    pub fn trigger(title: impl Into<String>, message: impl Into<String>) -> Self {
        AlertRecord {
            time: Utc::now(),
            title: title.into(),
            message: message.into(),
            is_reminder: false,
        }
    }

    /// Record appended on every reminder tick.
    pub fn reminder() -> Self {
        AlertRecord {
            time: Utc::now(),
            title: REMINDER_TITLE.to_owned(),
            message: REMINDER_MESSAGE.to_owned(),
            is_reminder: true,
        }
    }

    /// Record appended when the alert is acknowledged.
    pub fn acknowledged() -> Self {
        AlertRecord {
            time: Utc::now(),
            title: ACKNOWLEDGED_TITLE.to_owned(),
            message: ACKNOWLEDGED_MESSAGE.to_owned(),
            is_reminder: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_record_is_not_a_reminder() {
        let record = AlertRecord::trigger("Fall", "bedroom");
        assert_eq!(record.title, "Fall");
        assert_eq!(record.message, "bedroom");
        assert!(!record.is_reminder);
    }

    #[test]
    fn test_reminder_record_uses_fixed_text() {
        let record = AlertRecord::reminder();
        assert_eq!(record.title, REMINDER_TITLE);
        assert_eq!(record.message, REMINDER_MESSAGE);
        assert!(record.is_reminder);
    }

    #[test]
    fn test_acknowledged_record_is_not_a_reminder() {
        let record = AlertRecord::acknowledged();
        assert_eq!(record.title, ACKNOWLEDGED_TITLE);
        assert!(!record.is_reminder);
    }
}
