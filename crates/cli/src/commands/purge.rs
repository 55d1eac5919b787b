//! `parley purge`: retention cleanup.

use super::{load_config, open_store};
use parley_core::store::Store;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let store = open_store(&config).await?;

    let removed = store.purge_expired(chrono::Utc::now()).await?;
    tracing::info!(removed, store = store.name(), "Purge finished");
    println!("Removed {removed} expired record(s)");
    Ok(())
}
