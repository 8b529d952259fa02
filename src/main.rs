// ABOUTME: Entry point for the roomstore binary.
// ABOUTME: Initializes tracing, opens the file store for the configured account, and reports what it holds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use roomstore_core::{Credentials, EventStore, StoreListener};
use roomstore_store::{FileStore, StoreConfig};

const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

struct LogListener;

impl StoreListener for LogListener {
    fn on_store_ready(&self, account_id: &str) {
        tracing::info!("store for {} is ready", account_id);
    }

    fn on_store_corrupted(&self, account_id: &str) {
        tracing::warn!("store for {} was corrupted and has been reset", account_id);
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("roomstore=debug")),
        )
        .init();

    let config = StoreConfig::from_env().context("invalid store configuration")?;
    let user_id = std::env::var("ROOMSTORE_USER_ID").context("ROOMSTORE_USER_ID is not set")?;
    let access_token =
        std::env::var("ROOMSTORE_ACCESS_TOKEN").context("ROOMSTORE_ACCESS_TOKEN is not set")?;

    tracing::info!("roomstore starting up with home {}", config.home.display());

    let store = FileStore::new(config, Credentials::new(user_id, access_token))
        .context("failed to create store")?;
    store.set_listener(Arc::new(LogListener));
    store.open();

    let started = Instant::now();
    while !store.is_ready() {
        if started.elapsed() > OPEN_TIMEOUT {
            store.close();
            bail!("store did not become ready within {:?}", OPEN_TIMEOUT);
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let rooms = store.rooms();
    let events: usize = rooms
        .iter()
        .filter_map(|room| store.room_messages(&room.room_id))
        .map(|messages| messages.len())
        .sum();
    tracing::info!(
        "{} rooms, {} cached events, {} summaries, {} bytes on disk",
        rooms.len(),
        events,
        store.summaries().len(),
        store.disk_usage()
    );
    if let Some(token) = store.event_stream_token() {
        tracing::info!("resuming sync from {}", token);
    }

    store.close();
    Ok(())
}
