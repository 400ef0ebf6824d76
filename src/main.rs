//! Veille - a fall-alert escalation and event-log service for home
//! monitoring.
//!
//! This is the main entry point for Veille, which subscribes to a
//! Gotify-style alert server, escalates every detected fall into a stream of
//! reminders until a caregiver acknowledges it, and keeps a durable local
//! log of all fall events.
//!
//! # Overview
//!
//! A camera-based detector reports falls to the alert server. Veille
//! subscribes to the server's message stream: each inbound fall frame is
//! persisted to the local SQLite event log and escalated. While a fall is
//! unacknowledged, a reminder is pushed back through the alert server every
//! `reminder_interval` seconds so the alert cannot be missed.
//!
//! # Features
//!
//! - **Fall Ingestion**: Live WebSocket subscription to the alert server
//! - **Escalating Reminders**: Repeating reminders until acknowledgement
//! - **Durable Event Log**: Append-only SQLite log of every fall
//! - **Manual Simulation**: Falls can be injected for end-to-end testing
//! - **YAML Configuration**: Simple configuration file format with
//!   environment variable support
//!
//! # Configuration
//!
//! Create a `config.yaml` file with your settings:
//!
//! ```yaml
//! gotify:
//!   url: "https://push.example.com"
//!   token: "AbCdEf123456"
//!
//! escalation:
//!   reminder_interval: 30
//! ```
//!
//! # Environment Variable Overrides
//!
//! Override any configuration value using environment variables with the
//! `VEILLE_` prefix:
//!
//! ```bash
//! export VEILLE_GOTIFY__URL="https://push.example.com"
//! export VEILLE_GOTIFY__TOKEN="AbCdEf123456"
//! export VEILLE_ESCALATION__REMINDER_INTERVAL=60
//! ```
//!
//! # Usage
//!
//! ```bash
//! veille --config config.yaml --data ./veille-data
//! ```
//!
//! # Architecture
//!
//! The service consists of several modules:
//!
//! - [`channel`] - Outbound pushes and the inbound stream subscription
//! - [`config`] - YAML configuration loading with environment overrides
//! - [`escalation`] - The reminder state machine and session timeline
//! - [`service`] - Wiring between channel, escalation and store
//! - [`store`] - Append-only SQLite fall-event log with live range watching
//! - [`utils`] - Path helpers
//!
//! # Runtime Behavior
//!
//! Once started, the service runs until interrupted:
//!
//! 1. **Stream Task**: Reads fall frames from the alert server subscription
//! 2. **Ingestion Task**: Persists and escalates frames in arrival order
//! 3. **Outbound Task**: Pushes alert records back to the alert server
//!
//! A lost subscription is logged and left down; the service never reconnects
//! on its own. Ctrl-C disconnects and closes the event store cleanly.
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (default: `info`)

use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use log::{error, info};

use crate::channel::{ConnectionConfig, GotifySender};
use crate::config::Config;
use crate::service::Service;
use crate::store::EventStore;

mod channel;
mod config;
mod escalation;
mod service;
mod store;
mod utils;

/// Command-line arguments for the Veille service.
///
/// Most configuration is done through the YAML file (see [`config::Config`]).
///
/// # Examples
///
/// ```bash
/// veille --config config.yaml --data ./veille-data
/// ```
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    ///
    /// The configuration file should contain the alert server credentials
    /// and the escalation settings. See the [`config`] module for the
    /// expected format.
    #[arg(short, long)]
    config: String,

    /// Path to the directory for storing persistent data.
    ///
    /// This directory will contain `fall_events.db`, the SQLite fall-event
    /// log. It is created if missing.
    #[arg(short, long)]
    data: String,
}

/// Main entry point for the Veille service.
///
/// Initializes logging, loads the configuration, opens the event store and
/// wires up the service, then waits for Ctrl-C.
///
/// # Error Handling
///
/// Configuration and storage setup errors are logged and end the process
/// without panicking. Network errors during operation are logged but never
/// stop the service: falls keep being escalated and persisted locally even
/// with the alert server unreachable.
#[tokio::main]
async fn main() {
    // Put logger at info level by default
    let env = Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    info!("Starting veille {}...", env!("CARGO_PKG_VERSION"));

    // Parse command line arguments
    let args = Args::parse();

    // Load configuration from YAML file with environment variable overrides
    let config: Config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load config file: {}", e);
            return;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&args.data) {
        error!("Failed to create data directory: {}", e);
        return;
    }

    let store = match EventStore::open(utils::db_path(&args.data)) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open the event store: {}", e);
            return;
        }
    };

    let sender = GotifySender::new(&config.gotify.url, &config.gotify.token);
    let service = Arc::new(Service::new(sender, store, config.reminder_interval()));

    // Outbound task draining the alert record queue
    let outbound = Arc::clone(&service);
    tokio::spawn(async move { outbound.forward_alerts().await });

    // Subscribe to the alert server stream
    service
        .connect(&ConnectionConfig::new(&config.gotify.url, &config.gotify.token))
        .await;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
    service.shutdown().await;
}
