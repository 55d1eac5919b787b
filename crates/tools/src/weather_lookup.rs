//! Current weather via the OpenWeatherMap API.

use async_trait::async_trait;
use parley_config::WeatherConfig;
use parley_core::error::ToolError;
use parley_core::tool::Tool;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

const TOOL_NAME: &str = "get_weather";

pub struct WeatherTool {
    api_key: String,
    api_url: String,
    default_city: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Observation {
    name: String,
    weather: Vec<Condition>,
    main: Readings,
    wind: Wind,
}

#[derive(Debug, Deserialize)]
struct Condition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct Readings {
    temp: f64,
    feels_like: f64,
    humidity: u32,
}

#[derive(Debug, Deserialize)]
struct Wind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
}

impl WeatherTool {
    pub fn new(
        api_key: impl Into<String>,
        default_city: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            api_url: "https://api.openweathermap.org/data/2.5/weather".into(),
            default_city: default_city.into(),
            client,
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &WeatherConfig) -> Option<Result<Self, ToolError>> {
        let key = config.api_key.as_ref()?;
        Some(
            Self::new(
                key.clone(),
                config.default_city.clone(),
                Duration::from_secs(config.timeout_secs),
            )
            .map(|tool| tool.with_api_url(&config.api_url)),
        )
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    fn failed(reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: TOOL_NAME.into(),
            reason: reason.into(),
        }
    }
}

fn describe(obs: &Observation) -> String {
    let conditions = obs
        .weather
        .first()
        .map(|c| c.description.as_str())
        .unwrap_or("no description");
    format!(
        "Weather in {}: {}, {:.0}°C (feels like {:.0}°C), humidity {}%, wind {} m/s",
        obs.name, conditions, obs.main.temp, obs.main.feels_like, obs.main.humidity, obs.wind.speed
    )
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Get the current weather in a city"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "description": "City name, e.g. Paris, London, Saint Petersburg"
                }
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let city = arguments["city"]
            .as_str()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.default_city)
            .to_string();

        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("q", city.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .map_err(|e| Self::failed(e.to_string()))?;

        let status = response.status().as_u16();
        info!(tool = TOOL_NAME, city = %city, status, "Weather lookup");

        match status {
            200 => {
                let obs: Observation = response
                    .json()
                    .await
                    .map_err(|e| Self::failed(format!("unexpected payload: {e}")))?;
                Ok(describe(&obs))
            }
            404 => Ok(format!("City '{city}' not found. Ask the user to check the name.")),
            _ => {
                let detail = response
                    .json::<ApiError>()
                    .await
                    .ok()
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| format!("status {status}"));
                Err(Self::failed(detail))
            }
        }
    }
}
