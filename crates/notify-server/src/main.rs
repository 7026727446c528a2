//! # Notify Server
//!
//! Room-subscription multiplexing server: websocket clients join rooms, the
//! server keeps one backend subscription per occupied room and fans published
//! messages out to the room's members.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! notify
//!
//! # Run with a custom config file
//! NOTIFY_CONFIG=/path/to/notify.toml notify
//!
//! # Run with environment variables
//! NOTIFY_PORT=8080 NOTIFY_HOST=0.0.0.0 NOTIFY_NOTIFY__POLICY=track_pending notify
//! ```

mod bus;
mod config;
mod handlers;
mod hub;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notify=debug,notify_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        policy = ?config.notify.policy,
        "Starting Notify server on {}:{}",
        config.host,
        config.port
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
