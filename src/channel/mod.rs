//! Push-notification channel to the remote alert server.
//!
//! This module provides both directions of the alert channel:
//!
//! - [`GotifySender`] / [`Notifier`]: outbound `POST /message` requests
//! - [`PushChannel`]: the inbound long-lived `/stream` subscription
//! - [`ConnectionConfig`]: the configured server URL and token
//! - [`NetworkError`]: typed channel failures
//!
//! # Failure semantics
//!
//! Outbound failures (any response status >= 300, or a request error) are
//! returned to the caller as [`NetworkError`]. Inbound transport failures
//! are reported through the error callback passed to
//! [`PushChannel::connect`]; there is no automatic reconnection. Inbound
//! frames that do not decode to a keyed JSON object are dropped silently
//! and the subscription continues.
//!
//! # Example Usage
//!
//! ```no_run
//! use veille::channel::{ConnectionConfig, GotifySender, Notifier, PushChannel};
//!
//! # async fn example() -> Result<(), veille::channel::NetworkError> {
//! let config = ConnectionConfig::new("https://push.example.com", "app-token");
//!
//! let sender = GotifySender::new(&config.server_url, &config.app_token);
//! sender.send("Fall detected", "bedroom", 5).await?;
//!
//! let mut channel = PushChannel::new();
//! channel.connect(
//!     &config,
//!     |frame| println!("inbound frame: {frame:?}"),
//!     |error| eprintln!("subscription error: {error}"),
//! );
//! # Ok(())
//! # }
//! ```

mod sender;
mod stream;

use thiserror::Error;

pub use crate::channel::sender::{DEFAULT_PRIORITY, GotifySender, Notifier};
pub use crate::channel::stream::{ConnectionConfig, PushChannel};

#[cfg(test)]
pub use crate::channel::sender::MockNotifier;

/// Failures of the notification channel.
///
/// All of these are non-fatal: a failed send or a dropped subscription must
/// never stop the escalation engine from reminding.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The alert server answered with a non-success status.
    #[error("alert server answered {status}: {body}")]
    Status {
        /// Response status code (>= 300).
        status: u16,
        /// Response body, for the transient user notice.
        body: String,
    },
    /// Connection-level transport failure on the inbound subscription.
    #[error("subscription transport failure: {0}")]
    Transport(String),
    /// Outbound request failure below the HTTP layer.
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}
