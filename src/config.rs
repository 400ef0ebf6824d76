//! Configuration file structures for the Veille service.
//!
//! This module defines the YAML configuration file format. The configuration
//! is split into two sections: the Gotify alert server credentials and the
//! escalation settings.
//!
//! # Configuration File Format
//!
//! ```yaml
//! # Gotify alert server
//! gotify:
//!   # Base URL of the alert server
//!   url: "https://push.example.com"
//!
//!   # Application token authorizing pushes and the stream subscription
//!   token: "AbCdEf123456"
//!
//! # Escalation settings
//! escalation:
//!   # Seconds between reminders while an alert waits for acknowledgement
//!   reminder_interval: 30
//! ```
//!
//! Leaving `gotify.url` or `gotify.token` empty (or omitting the section)
//! keeps the service disconnected from the alert server. Falls are still
//! escalated and persisted locally in that state.
//!
//! # Environment Variable Overrides
//!
//! Every value can be overridden with a `VEILLE_` prefixed environment
//! variable, with `__` separating the section from the key:
//!
//! ```bash
//! export VEILLE_GOTIFY__URL="https://push.example.com"
//! export VEILLE_GOTIFY__TOKEN="AbCdEf123456"
//! export VEILLE_ESCALATION__REMINDER_INTERVAL=60
//! ```

use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::Deserialize;

use crate::escalation::DEFAULT_REMINDER_INTERVAL;

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "VEILLE_";

/// Root configuration structure for the Veille service.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Gotify alert server credentials.
    #[serde(default)]
    pub gotify: Gotify,
    /// Escalation settings.
    #[serde(default)]
    pub escalation: Escalation,
}

/// Gotify alert server credentials.
///
/// # YAML Section
///
/// ```yaml
/// gotify:
///   url: "https://push.example.com"
///   token: "AbCdEf123456"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Gotify {
    /// Base URL of the alert server.
    ///
    /// Should include the protocol (http/https). An empty URL means no
    /// alert server is configured.
    #[serde(default)]
    pub url: String,

    /// Application token.
    ///
    /// Authorizes both outbound message pushes and the inbound stream
    /// subscription. An empty token means no alert server is configured.
    #[serde(default)]
    pub token: String,
}

/// Escalation settings.
///
/// # YAML Section
///
/// ```yaml
/// escalation:
///   reminder_interval: 30
/// ```
#[derive(Debug, Deserialize)]
pub struct Escalation {
    /// Seconds between reminders while an alert waits for acknowledgement.
    #[serde(default = "default_reminder_interval_secs")]
    pub reminder_interval: u64,
}

impl Default for Escalation {
    fn default() -> Self {
        Escalation {
            reminder_interval: default_reminder_interval_secs(),
        }
    }
}

fn default_reminder_interval_secs() -> u64 {
    DEFAULT_REMINDER_INTERVAL.as_secs()
}

impl Config {
    /// Load the configuration from a YAML file, applying `VEILLE_` prefixed
    /// environment variable overrides on top.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file.
    ///
    /// # Returns
    ///
    /// The parsed [`Config`], or a [`figment::Error`] when the file cannot
    /// be parsed or a value has the wrong type.
    pub fn load(path: &str) -> Result<Config, figment::Error> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// The reminder interval as a [`Duration`].
    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(self.escalation.reminder_interval)
    }
}
