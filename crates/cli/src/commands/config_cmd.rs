//! `parley config`: configuration management commands.

use super::{config_file, load_config};
use parley_config::AppConfig;
use std::path::Path;

const REDACTED: &str = "[REDACTED]";

/// Copy of `config` safe to print.
fn redacted(config: &AppConfig) -> AppConfig {
    let mut shown = config.clone();
    let hide = |secret: &mut Option<String>| {
        if secret.is_some() {
            *secret = Some(REDACTED.into());
        }
    };
    hide(&mut shown.anthropic.api_key);
    hide(&mut shown.telegram.bot_token);
    hide(&mut shown.weather.api_key);
    hide(&mut shown.gateway.webhook_secret);
    shown
}

pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let toml_str = toml::to_string_pretty(&redacted(&config))?;
    println!("{toml_str}");
    Ok(())
}

pub fn init(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_file(config_path);
    if path.exists() && !force {
        println!("Config already exists at: {}", path.display());
        println!("   Edit it manually or re-run with --force.");
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("Created {}", path.display());
    println!("   Next: set ANTHROPIC_API_KEY and TELEGRAM_BOT_TOKEN, then run `parley serve`.");
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    println!("{}", config_file(config_path).display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = config_file(None);
        assert!(path.to_str().unwrap().ends_with("config.toml"));
        assert_eq!(config_file(Some(Path::new("/etc/parley.toml"))), Path::new("/etc/parley.toml"));
    }

    #[test]
    fn secrets_are_hidden() {
        let mut config = AppConfig::default();
        config.anthropic.api_key = Some("sk-ant-secret".into());
        config.gateway.webhook_secret = Some("hook".into());

        let text = toml::to_string_pretty(&redacted(&config)).unwrap();
        assert!(!text.contains("sk-ant-secret"));
        assert!(!text.contains("\"hook\""));
        assert!(text.contains(REDACTED));
        // Unset secrets stay unset.
        assert!(redacted(&config).telegram.bot_token.is_none());
    }
}
