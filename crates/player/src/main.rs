//! Tavern Player - terminal client binary
//!
//! Usage: `tavern-player <session-id>`

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tavern_player::config::{load_dotenv, ClientConfig};
use tavern_player::infrastructure::storage::FileStorageProvider;
use tavern_player::ports::outbound::StorageProvider;
use tavern_player::{runner, SessionService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(dir) = std::env::current_dir() {
        load_dotenv(&dir);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tavern_player=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let session_id = std::env::args()
        .nth(1)
        .context("usage: tavern-player <session-id>")?;
    let config = ClientConfig::from_env()?;

    let storage = match &config.storage_path {
        Some(path) => FileStorageProvider::at(path.clone()),
        None => FileStorageProvider::new(),
    };
    tracing::info!(storage = %storage.path().display(), "Starting Tavern Player");
    let storage: Arc<dyn StorageProvider> = Arc::new(storage);

    runner::run(SessionService::new(config, storage), &session_id).await
}
