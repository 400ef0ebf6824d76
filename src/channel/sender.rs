//! Outbound HTTP client for the alert server.
//!
//! This module provides the [`GotifySender`] struct for pushing alert
//! messages to the remote notification server.

use std::time::Duration;

use log::{debug, info};
use mockall::automock;
use reqwest::Client;
use serde_json::json;

use crate::channel::NetworkError;

/// Priority attached to outbound alert messages when none is given.
pub const DEFAULT_PRIORITY: i64 = 5;

/// Timeout applied to each outbound request.
///
/// The inbound subscription is long-lived and carries no timeout; only the
/// outbound sends are bounded.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Trait for pushing alert messages to the alert server.
///
/// This trait abstracts the outbound HTTP operation for easier testing with
/// mocks.
#[automock]
pub trait Notifier {
    /// Push one alert message.
    ///
    /// Any response status >= 300 is a failure; the caller decides whether
    /// to surface it.
    async fn send(&self, title: &str, message: &str, priority: i64) -> Result<(), NetworkError>;
}

/// HTTP client pushing alert messages to a Gotify-style server.
///
/// # Examples
///
/// ```no_run
/// # use veille::channel::{GotifySender, Notifier};
/// # async fn example() -> Result<(), veille::channel::NetworkError> {
/// let sender = GotifySender::new("https://push.example.com", "app-token");
/// sender.send("Fall detected", "bedroom", 5).await?;
/// # Ok(())
/// # }
/// ```
pub struct GotifySender {
    /// Base URL of the alert server, without trailing slash.
    url: String,
    /// Application token, sent as the credential header.
    app_token: String,
    /// Per-request timeout.
    send_timeout: Duration,
    /// HTTP client
    client: Client,
}

impl GotifySender {
    /// Create a new [`GotifySender`] with the default send timeout.
    ///
    /// # Arguments
    ///
    /// * `url` - Base URL of the alert server.
    /// * `app_token` - Application token authorizing message pushes.
    pub fn new(url: &str, app_token: &str) -> Self {
        Self::with_timeout(url, app_token, DEFAULT_SEND_TIMEOUT)
    }

    /// Create a new [`GotifySender`] with an explicit send timeout.
    pub fn with_timeout(url: &str, app_token: &str, send_timeout: Duration) -> Self {
        GotifySender {
            url: url.trim_end_matches('/').to_owned(),
            app_token: app_token.to_owned(),
            send_timeout,
            client: Client::new(),
        }
    }
}

impl Notifier for GotifySender {
    /// Request `POST /message` to push one alert message.
    ///
    /// The body is a JSON object `{"title", "message", "priority"}` and the
    /// token travels in the `X-Gotify-Key` header.
    async fn send(&self, title: &str, message: &str, priority: i64) -> Result<(), NetworkError> {
        let url = format!("{}/message", &self.url);
        info!("push alert message \"{title}\"");
        debug!("request POST {url}");

        let response = self
            .client
            .post(&url)
            .header("X-Gotify-Key", &self.app_token)
            .timeout(self.send_timeout)
            .json(&json!({
                "title": title,
                "message": message,
                "priority": priority,
            }))
            .send()
            .await?;

        let status = response.status().as_u16();
        if status >= 300 {
            let body = response.text().await.unwrap_or_default();
            debug!("push rejected with {status}: {body}");
            return Err(NetworkError::Status { status, body });
        }

        debug!("push accepted with {status}");
        Ok(())
    }
}
