// Watch contract events on the configured chain and keep the cache fresh.
// Mostly useful for checking an RPC endpoint and contract address by eye.

use std::sync::Arc;
use ticket_data_service::cache::FileStorage;
use ticket_data_service::chain::HttpConnector;
use ticket_data_service::{event_callback, AppState, Config, EventFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!("configuration loaded: {:?}", config);

    let storage = Arc::new(FileStorage::new("ticket-cache.json"));
    let state = AppState::new(config, Arc::new(HttpConnector), Some(storage));
    state.start().await?;

    state
        .listeners
        .add_listener(
            "watch",
            event_callback(|event| async move {
                println!(
                    "block {:>9} idx {:>3}  {:?}",
                    event.block_number(),
                    event.meta().log_index,
                    event
                );
                Ok(())
            }),
            EventFilter::default(),
        )
        .await?;

    tracing::info!("watching for contract events, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    state.shutdown().await;
    Ok(())
}
