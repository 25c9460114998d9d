use crate::app_config::AppConfig;
use crate::bridge::pair::create_application_key;
use crate::domain::commands::Command;
use crate::domain::events::ModelEvent;
use crate::engine::Engine;
use crate::sse::listen::{StreamConfig, listen};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{info, trace};

mod app_config;
mod bridge;
mod domain;
mod engine;
mod sse;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    info!("🪵 Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = Arc::new(AppConfig::load());
    info!("✅  Loaded configuration");

    if config.bridge().application_key().is_none() {
        let key = create_application_key(config.bridge().url(), config.bridge().device_name(), config.bridge().pair_timeout()).await?;
        info!("✅  Paired with the bridge. Add this key to config_local and restart:");
        info!("    bridge.application_key = \"{}\"", key.application_key);
        return Ok(());
    }

    let client = bridge::client::new_client(&config)?;

    let (events_tx, mut events_rx) = mpsc::channel::<ModelEvent>(config.core().event_buffer_size());
    let (commands_tx, commands_rx) = mpsc::channel::<Command>(config.core().command_buffer_size());
    let (stream_tx, stream_rx) = mpsc::channel(16);

    task::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping");
            let _ = commands_tx.send(Command::Stop).await;
        }
    });

    task::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            trace!("Model event: {:?}", event);
        }
    });
    info!("✅  Initialized event listener");

    let engine = Engine::new(config.clone(), client.clone(), events_tx, commands_rx, stream_rx);
    task::spawn(async move {
        engine.run().await;
    });
    info!("✅  Initialized engine");

    info!("🔥 {} is up and running", env!("CARGO_PKG_NAME"));

    let stream_config = StreamConfig {
        url: config.bridge().url().to_string(),
        quick_retries: config.stream().quick_retries(),
        quick_retry_delay: config.stream().quick_retry_delay(),
        long_retry_delay: config.stream().long_retry_delay(),
        stale_connection_timeout: config.stream().stale_connection_timeout(),
    };
    listen(stream_tx, client, stream_config).await;

    Ok(())
}
