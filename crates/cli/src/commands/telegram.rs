//! `parley telegram`: Bot API housekeeping.

use super::load_config;
use parley_channels::TelegramChannel;
use std::path::Path;

pub async fn set_webhook(config_path: Option<&Path>, url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    if config.telegram.bot_token.is_none() {
        return Err("No Telegram bot token configured (set TELEGRAM_BOT_TOKEN)".into());
    }
    if !url.starts_with("https://") {
        return Err(format!("Webhook URL must use https: {url}").into());
    }

    let channel = TelegramChannel::from_config(&config.telegram)?;
    let secret = config.gateway.webhook_secret.as_deref();
    channel.set_webhook(url, secret).await?;

    println!("Webhook set to {url}");
    if secret.is_none() {
        println!("   No webhook secret configured; requests will not be authenticated.");
    }
    Ok(())
}
