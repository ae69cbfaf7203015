//! Deblur web service
//!
//! Accepts image uploads, forwards them to an external deblurring service and
//! serves the original and processed images until the client releases them.

mod config;
mod deblur;
mod error;
mod server;
mod types;

use crate::config::Config;
use crate::deblur::DeblurClient;
use crate::error::{Result, WebError};
use crate::server::{start_server, ServerState, SharedState};
use ephemeral_blob_store::{spawn_purge_task, StoreCell};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("deblur_web=info".parse()?)
        .add_directive("ephemeral_blob_store=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting deblur web service...");

    let config = Config::from_env()?;
    info!("Port: {}", config.port);
    info!("Max image age: {} seconds", config.store.max_age.as_secs());
    info!("Max stored entries: {}", config.store.max_entries);
    match &config.deblur_api_url {
        Some(url) => info!("Deblur service: {}", url),
        None => info!("Deblur service not configured, uploads are stored unprocessed"),
    }

    // Storage is required for every route, so a failure here is fatal
    let cell = StoreCell::new();
    let store = cell.get_or_open(&config.store, &config.backend).await?;

    if let Some(every) = config.purge_interval {
        info!("Purging every {} seconds", every.as_secs());
        spawn_purge_task(store.clone(), every);
    }

    let deblur = DeblurClient::new(config.deblur_api_url.clone(), config.deblur_timeout)
        .map_err(|e| WebError::Config(format!("HTTP client: {}", e)))?;

    let state: SharedState = Arc::new(ServerState::new(store, deblur));

    start_server(state, &config)
        .await
        .map_err(|e| WebError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
