pub mod config_cmd;
pub mod process;
pub mod purge;
pub mod serve;
pub mod telegram;

use parley_agent::MessageProcessor;
use parley_config::AppConfig;
use parley_core::channel::Channel;
use parley_core::store::Store;
use parley_memory::SqliteStore;
use parley_providers::AnthropicProvider;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// The config file `--config` names, or the default location.
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load the config file plus environment overrides.
pub fn load_config(explicit: Option<&Path>) -> CliResult<AppConfig> {
    let path = config_file(explicit);
    AppConfig::load_with_env(&path).map_err(|e| format!("Failed to load config: {e}").into())
}

pub async fn open_store(config: &AppConfig) -> CliResult<Arc<dyn Store>> {
    let path = config.storage.database_path();
    let store = SqliteStore::open(&path)
        .await
        .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
    Ok(Arc::new(store))
}

/// Wire the engine to its collaborators.
pub fn build_processor(
    config: &AppConfig,
    store: Arc<dyn Store>,
    channel: Arc<dyn Channel>,
) -> CliResult<MessageProcessor> {
    if !config.has_api_key() {
        return Err(format!(
            "No Anthropic API key configured. Set ANTHROPIC_API_KEY or add it to {}",
            AppConfig::config_dir().join("config.toml").display()
        )
        .into());
    }
    let provider = Arc::new(AnthropicProvider::from_config(&config.anthropic)?);
    let tools = Arc::new(parley_tools::registry_from_config(config));
    if tools.is_empty() {
        tracing::info!("No tools configured");
    } else {
        tracing::info!(tools = ?tools.names(), "Tools enabled");
    }
    Ok(MessageProcessor::new(config, store, provider, channel, tools))
}
