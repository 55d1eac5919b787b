//! `parley process`: run one raw update through the engine.

use super::{build_processor, load_config, open_store};
use parley_channels::{ConsoleChannel, TelegramChannel};
use parley_core::channel::Channel;
use parley_core::store::Store;
use parley_memory::InMemoryStore;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

pub async fn run(
    config_path: Option<&Path>,
    file: Option<&Path>,
    ephemeral: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;

    let raw = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Cannot read {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let (store, channel): (Arc<dyn Store>, Arc<dyn Channel>) = if ephemeral {
        (
            Arc::new(InMemoryStore::new()),
            Arc::new(ConsoleChannel::new(config.telegram.chunk_limit)),
        )
    } else {
        (
            open_store(&config).await?,
            Arc::new(TelegramChannel::from_config(&config.telegram)?),
        )
    };

    let processor = build_processor(&config, store, channel)?;
    let outcome = processor.process(&raw).await;
    eprintln!("{outcome}");
    Ok(())
}
