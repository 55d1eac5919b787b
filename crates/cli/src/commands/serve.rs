//! `parley serve`: webhook gateway plus event worker.

use super::{build_processor, load_config, open_store};
use parley_channels::TelegramChannel;
use std::path::Path;
use std::sync::Arc;

pub async fn run(config_path: Option<&Path>, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if config.telegram.bot_token.is_none() {
        return Err("No Telegram bot token configured (set TELEGRAM_BOT_TOKEN)".into());
    }
    if config.bot_handle().is_none() && config.telegram.bot_id.is_none() {
        tracing::warn!("Neither bot username nor bot id is set; group mentions cannot be detected");
    }

    let store = open_store(&config).await?;
    let channel = Arc::new(TelegramChannel::from_config(&config.telegram)?);
    let processor = Arc::new(build_processor(&config, store, channel)?);

    println!("parley gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Webhook:   POST /webhook/telegram");
    println!("   Model:     {}", config.anthropic.model);
    println!("   Database:  {}", config.storage.database_path().display());

    parley_gateway::start(&config, processor).await
}
