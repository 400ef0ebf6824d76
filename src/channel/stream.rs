//! Inbound WebSocket subscription to the alert server.

use futures::StreamExt;
use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::channel::NetworkError;

/// Credentials of the alert server connection.
///
/// An empty `server_url` or `app_token` means the user intentionally left the
/// channel unconfigured. That state is not an error: connecting with such a
/// config is a quiet no-op.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionConfig {
    /// Base HTTP(S) URL of the alert server.
    pub server_url: String,
    /// Application token authorizing the subscription.
    pub app_token: String,
}

impl ConnectionConfig {
    /// Create a new [`ConnectionConfig`].
    pub fn new(server_url: &str, app_token: &str) -> Self {
        ConnectionConfig {
            server_url: server_url.to_owned(),
            app_token: app_token.to_owned(),
        }
    }

    /// Config representing an intentionally unconfigured channel.
    pub fn disconnected() -> Self {
        ConnectionConfig::default()
    }

    /// `true` when either field is empty and no connection should be made.
    pub fn is_disconnected(&self) -> bool {
        self.server_url.is_empty() || self.app_token.is_empty()
    }
}

/// Derive the WebSocket stream URL from the server's base HTTP URL.
///
/// `https` upgrades to `wss`, `http` to `ws`. A base URL without scheme gets
/// `ws`. Trailing slashes on the base URL are ignored.
fn stream_url(server_url: &str, app_token: &str) -> String {
    let (scheme, host) = if let Some(host) = server_url.strip_prefix("https://") {
        ("wss", host)
    } else if let Some(host) = server_url.strip_prefix("http://") {
        ("ws", host)
    } else {
        ("ws", server_url)
    };
    let host = host.trim_end_matches('/');
    format!("{scheme}://{host}/stream?token={app_token}")
}

/// Decode one text frame into a keyed JSON object.
///
/// Valid JSON that is not an object (bare strings, numbers, arrays) and
/// invalid JSON both yield `None`.
fn decode_frame(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Long-lived subscription to the alert server's `/stream` endpoint.
///
/// The channel owns at most one subscription task. [`PushChannel::connect`]
/// replaces any previous subscription and [`PushChannel::disconnect`] is
/// idempotent. A dropped connection is reported through the error callback
/// and the channel stays disconnected until told otherwise; it never
/// reconnects on its own.
pub struct PushChannel {
    /// Running subscription task, if any.
    subscription: Option<JoinHandle<()>>,
}

impl PushChannel {
    /// Create a new, disconnected [`PushChannel`].
    pub fn new() -> Self {
        PushChannel { subscription: None }
    }

    /// `true` while a subscription task is running.
    pub fn is_connected(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Open the inbound subscription.
    ///
    /// Any previous subscription is torn down first. With a disconnected
    /// config this only tears down and returns.
    ///
    /// # Arguments
    ///
    /// * `config` - Server URL and token.
    /// * `on_message` - Called for every decoded keyed JSON frame, in arrival
    ///   order.
    /// * `on_error` - Called when the connection cannot be established or
    ///   drops.
    pub fn connect<M, E>(&mut self, config: &ConnectionConfig, on_message: M, on_error: E)
    where
        M: Fn(Map<String, Value>) + Send + 'static,
        E: Fn(NetworkError) + Send + 'static,
    {
        self.disconnect();

        if config.is_disconnected() {
            info!("alert server not configured, staying disconnected");
            return;
        }

        let url = stream_url(&config.server_url, &config.app_token);
        self.subscription = Some(tokio::spawn(run_subscription(url, on_message, on_error)));
    }

    /// Tear down the subscription. Calling this while disconnected is a
    /// no-op.
    pub fn disconnect(&mut self) {
        if let Some(task) = self.subscription.take() {
            info!("closing alert server subscription");
            task.abort();
        }
    }
}

impl Default for PushChannel {
    fn default() -> Self {
        PushChannel::new()
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Read loop of one subscription.
async fn run_subscription<M, E>(url: String, on_message: M, on_error: E)
where
    M: Fn(Map<String, Value>) + Send + 'static,
    E: Fn(NetworkError) + Send + 'static,
{
    let mut ws = match connect_async(&url).await {
        Ok((ws, _)) => {
            info!("subscribed to the alert server stream");
            ws
        }
        Err(error) => {
            error!("failed to subscribe to the alert server: {error}");
            on_error(NetworkError::Transport(error.to_string()));
            return;
        }
    };

    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => match decode_frame(&text) {
                Some(map) => on_message(map),
                None => debug!("dropping undecodable frame"),
            },
            Ok(Message::Close(_)) => {
                warn!("alert server closed the stream");
                on_error(NetworkError::Transport("stream closed by server".to_owned()));
                return;
            }
            // Pings are answered by the protocol layer on the next read.
            Ok(_) => {}
            Err(error) => {
                error!("alert server stream failed: {error}");
                on_error(NetworkError::Transport(error.to_string()));
                return;
            }
        }
    }

    warn!("alert server stream ended");
    on_error(NetworkError::Transport("stream ended".to_owned()));
}
