//! Tools the model may call while composing a reply.
//!
//! Tools are offered only when they are usable: a tool that needs an API
//! key is not registered without one.

pub mod weather_lookup;

use parley_config::AppConfig;
use parley_core::tool::ToolRegistry;
use tracing::{debug, warn};

pub use weather_lookup::WeatherTool;

/// Build the registry of tools enabled by `config`.
pub fn registry_from_config(config: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    match WeatherTool::from_config(&config.weather) {
        Some(Ok(tool)) => registry.register(Box::new(tool)),
        Some(Err(e)) => warn!(error = %e, "Weather tool disabled"),
        None => debug!("No OpenWeatherMap key, weather tool not offered"),
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weather_requires_key() {
        let mut config = AppConfig::default();
        assert!(registry_from_config(&config).is_empty());

        config.weather.api_key = Some("owm-key".into());
        let registry = registry_from_config(&config);
        assert_eq!(registry.names(), vec!["get_weather"]);
    }
}
