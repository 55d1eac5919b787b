//! Configuration loading and validation for parley.
//!
//! Loads `~/.parley/config.toml` (or an explicit path), then applies
//! environment variable overrides. Every field has a default, so an empty or
//! missing file yields a runnable configuration apart from credentials.

use parley_core::Scope;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub weather: WeatherConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

// ── Inference ────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_anthropic_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Upper bound on model round-trips spent on tool calls per reply
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,

    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,
}

fn default_anthropic_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_model() -> String {
    "claude-sonnet-4-5".into()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_max_output_tokens() -> u32 {
    800
}
fn default_max_tool_iterations() -> usize {
    5
}
fn default_inference_timeout() -> u64 {
    60
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_anthropic_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_tool_iterations: default_max_tool_iterations(),
            timeout_secs: default_inference_timeout(),
        }
    }
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Context engine ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Token budget for preamble plus history
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Divisor of the character-based token estimate
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    #[serde(default = "default_message_overhead")]
    pub message_overhead_tokens: usize,

    #[serde(default = "default_request_overhead")]
    pub request_overhead_tokens: usize,

    /// Turns fetched from the store per request
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Most recent evicted turns sent for summarization
    #[serde(default = "default_eviction_summary_batch")]
    pub eviction_summary_batch: usize,

    #[serde(default = "default_summary_min_turns")]
    pub summary_min_turns: usize,

    #[serde(default = "default_summary_window")]
    pub summary_window: usize,

    #[serde(default = "default_profile_min_turns")]
    pub profile_min_turns: usize,

    #[serde(default = "default_profile_window")]
    pub profile_window: usize,

    #[serde(default = "default_topics_window")]
    pub topics_window: usize,

    #[serde(default = "default_max_topics")]
    pub max_topics: usize,

    /// Scope assigned to new group dialogs
    #[serde(default)]
    pub default_scope: Scope,

    #[serde(default = "default_base_prompt")]
    pub base_system_prompt: String,

    /// Offset of the reference clock shown to the model
    #[serde(default = "default_tz_offset")]
    pub timezone_offset_hours: i32,

    #[serde(default = "default_tz_label")]
    pub timezone_label: String,

    #[serde(default = "default_fallback_notice")]
    pub fallback_notice: String,

    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,
}

fn default_max_context_tokens() -> usize {
    6000
}
fn default_chars_per_token() -> usize {
    4
}
fn default_message_overhead() -> usize {
    4
}
fn default_request_overhead() -> usize {
    6
}
fn default_history_limit() -> usize {
    120
}
fn default_eviction_summary_batch() -> usize {
    16
}
fn default_summary_min_turns() -> usize {
    12
}
fn default_summary_window() -> usize {
    60
}
fn default_profile_min_turns() -> usize {
    50
}
fn default_profile_window() -> usize {
    80
}
fn default_topics_window() -> usize {
    10
}
fn default_max_topics() -> usize {
    5
}
fn default_base_prompt() -> String {
    "You are a friendly, concise assistant in a Telegram chat. \
     Answer in the language of the last message. Use plain text."
        .into()
}
fn default_tz_offset() -> i32 {
    3
}
fn default_tz_label() -> String {
    "MSK".into()
}
fn default_fallback_notice() -> String {
    "Sorry, I couldn't produce an answer this time. Please try again.".into()
}
fn default_store_timeout() -> u64 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            chars_per_token: default_chars_per_token(),
            message_overhead_tokens: default_message_overhead(),
            request_overhead_tokens: default_request_overhead(),
            history_limit: default_history_limit(),
            eviction_summary_batch: default_eviction_summary_batch(),
            summary_min_turns: default_summary_min_turns(),
            summary_window: default_summary_window(),
            profile_min_turns: default_profile_min_turns(),
            profile_window: default_profile_window(),
            topics_window: default_topics_window(),
            max_topics: default_max_topics(),
            default_scope: Scope::default(),
            base_system_prompt: default_base_prompt(),
            timezone_offset_hours: default_tz_offset(),
            timezone_label: default_tz_label(),
            fallback_notice: default_fallback_notice(),
            store_timeout_secs: default_store_timeout(),
        }
    }
}

// ── Telegram ─────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Bot handle without the leading `@`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<i64>,

    #[serde(default = "default_telegram_api")]
    pub api_base: String,

    /// `HTML`, `MarkdownV2`, or unset for plain text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,

    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: usize,

    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".into()
}
fn default_chunk_limit() -> usize {
    4000
}
fn default_transport_timeout() -> u64 {
    30
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            bot_username: None,
            bot_id: None,
            api_base: default_telegram_api(),
            parse_mode: None,
            chunk_limit: default_chunk_limit(),
            timeout_secs: default_transport_timeout(),
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("bot_username", &self.bot_username)
            .field("bot_id", &self.bot_id)
            .field("api_base", &self.api_base)
            .field("parse_mode", &self.parse_mode)
            .field("chunk_limit", &self.chunk_limit)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Weather tool ─────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// OpenWeatherMap key; the tool is not offered without it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_city")]
    pub default_city: String,

    #[serde(default = "default_weather_url")]
    pub api_url: String,

    #[serde(default = "default_weather_timeout")]
    pub timeout_secs: u64,
}

fn default_city() -> String {
    "Moscow".into()
}
fn default_weather_url() -> String {
    "https://api.openweathermap.org/data/2.5/weather".into()
}
fn default_weather_timeout() -> u64 {
    10
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_city: default_city(),
            api_url: default_weather_url(),
            timeout_secs: default_weather_timeout(),
        }
    }
}

impl std::fmt::Debug for WeatherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_city", &self.default_city)
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Storage ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file; defaults to `~/.parley/parley.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Turns and summaries older than this may be purged
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_retention_days() -> i64 {
    365
}

/// Upper bound for `storage.retention_days` (about a century).
pub const MAX_RETENTION_DAYS: i64 = 36_500;

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            retention_days: default_retention_days(),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("parley.db"))
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Events buffered between the webhook and the worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Expected `X-Telegram-Bot-Api-Secret-Token` header value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8443
}
fn default_queue_capacity() -> usize {
    256
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            queue_capacity: default_queue_capacity(),
            webhook_secret: None,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("queue_capacity", &self.queue_capacity)
            .field("webhook_secret", &redact(&self.webhook_secret))
            .finish()
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl AppConfig {
    /// Load configuration from `~/.parley/config.toml` plus the process
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply the process environment.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. `lookup` abstracts the environment so
    /// tests can feed a fixed map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ANTHROPIC_API_KEY") {
            self.anthropic.api_key = Some(v);
        }
        if let Some(v) = get("PARLEY_MODEL").or_else(|| get("CLAUDE_MODEL")) {
            self.anthropic.model = v;
        }
        if let Some(v) = get("MAX_OUTPUT_TOKENS") {
            self.anthropic.max_output_tokens = parse_env("MAX_OUTPUT_TOKENS", &v)?;
        }
        if let Some(v) = get("MAX_CONTEXT_TOKENS") {
            self.engine.max_context_tokens = parse_env("MAX_CONTEXT_TOKENS", &v)?;
        }
        if let Some(v) = get("MIN_MSGS_FOR_SUMMARY") {
            self.engine.summary_min_turns = parse_env("MIN_MSGS_FOR_SUMMARY", &v)?;
        }
        if let Some(v) = get("SUMMARY_HISTORY_LIMIT") {
            self.engine.summary_window = parse_env("SUMMARY_HISTORY_LIMIT", &v)?;
        }
        if let Some(v) = get("BASE_SYSTEM_PROMPT") {
            self.engine.base_system_prompt = v.trim().to_string();
        }
        if let Some(v) = get("GROUP_SCOPE_DEFAULT") {
            self.engine.default_scope = parse_env("GROUP_SCOPE_DEFAULT", &v)?;
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN").or_else(|| get("TELEGRAM_TOKEN")) {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = get("TELEGRAM_BOT_USERNAME").or_else(|| get("BOT_USERNAME")) {
            self.telegram.bot_username = Some(v);
        }
        if let Some(v) = get("TELEGRAM_BOT_ID").or_else(|| get("BOT_ID")) {
            self.telegram.bot_id = Some(parse_env("TELEGRAM_BOT_ID", &v)?);
        }
        if let Some(v) = get("TELEGRAM_PARSE_MODE") {
            self.telegram.parse_mode = Some(v);
        }
        if let Some(v) = get("OPENWEATHERMAP_API_KEY") {
            self.weather.api_key = Some(v);
        }
        if let Some(v) = get("WEATHER_DEFAULT_CITY") {
            self.weather.default_city = v;
        }
        if let Some(v) = get("PARLEY_DB_PATH") {
            self.storage.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PARLEY_WEBHOOK_SECRET") {
            self.gateway.webhook_secret = Some(v);
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// Bot handle normalized for matching: no `@`, lowercase.
    pub fn bot_handle(&self) -> Option<String> {
        self.telegram
            .bot_username
            .as_deref()
            .map(|u| u.trim().trim_start_matches('@').to_lowercase())
            .filter(|u| !u.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationError(msg.into()));

        if !(0.0..=1.0).contains(&self.anthropic.temperature) {
            return fail("anthropic.temperature must be between 0.0 and 1.0");
        }
        if self.anthropic.max_output_tokens == 0 {
            return fail("anthropic.max_output_tokens must be > 0");
        }
        if self.engine.max_context_tokens == 0 {
            return fail("engine.max_context_tokens must be > 0");
        }
        if self.engine.chars_per_token == 0 {
            return fail("engine.chars_per_token must be > 0");
        }
        if self.engine.history_limit == 0 {
            return fail("engine.history_limit must be > 0");
        }
        if self.engine.summary_window < self.engine.summary_min_turns {
            return fail("engine.summary_window must be >= engine.summary_min_turns");
        }
        if self.engine.profile_min_turns < self.engine.summary_min_turns {
            return fail("engine.profile_min_turns must be >= engine.summary_min_turns");
        }
        if self.telegram.chunk_limit == 0 || self.telegram.chunk_limit > 4096 {
            return fail("telegram.chunk_limit must be between 1 and 4096");
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.storage.retention_days) {
            return fail("storage.retention_days must be between 1 and 36500");
        }
        if self.gateway.queue_capacity == 0 {
            return fail("gateway.queue_capacity must be > 0");
        }
        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.anthropic.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key}: cannot parse '{value}'")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
