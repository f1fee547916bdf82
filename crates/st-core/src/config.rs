use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the bearer token for the studio API.
pub const TOKEN_ENV: &str = "STUDIO_SYNC_TOKEN";

/// Top-level configuration loaded from `~/.studio-sync/config.toml`.
///
/// **Security**: the bearer token is never part of this struct. It is read
/// from [`TOKEN_ENV`] at runtime, see [`bearer_token`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub auto_continue: AutoContinueConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from `~/.studio-sync/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;
        self.stream.validate()?;
        self.auto_continue.validate()?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        config_dir().join("config.toml")
    }
}

/// Read the bearer token from the environment. Blank values count as unset.
pub fn bearer_token() -> Option<String> {
    std::env::var(TOKEN_ENV)
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".studio-sync")
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the studio API, without trailing slash.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Applies to plain request/response calls only, never to the event stream.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ClientConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "client.api_url must be an http(s) URL, got '{}'",
                self.api_url
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "client.request_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_api_url() -> String {
    "http://127.0.0.1:8000/studio-api".into()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Delay before reconnecting after the server closed the stream cleanly.
    #[serde(default = "default_reconnect_after_close_ms")]
    pub reconnect_after_close_ms: u64,
    /// Delay before reconnecting after a transport failure.
    #[serde(default = "default_reconnect_after_error_ms")]
    pub reconnect_after_error_ms: u64,
    /// Yield to the scheduler after this many dispatched events.
    #[serde(default = "default_yield_every")]
    pub yield_every: usize,
    /// Bound of the channel between the connection task and the session.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_after_close_ms: default_reconnect_after_close_ms(),
            reconnect_after_error_ms: default_reconnect_after_error_ms(),
            yield_every: default_yield_every(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.yield_every == 0 {
            return Err(ConfigError::Validation(
                "stream.yield_every must be greater than 0".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "stream.channel_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_after_close(&self) -> Duration {
        Duration::from_millis(self.reconnect_after_close_ms)
    }

    pub fn reconnect_after_error(&self) -> Duration {
        Duration::from_millis(self.reconnect_after_error_ms)
    }
}

fn default_reconnect_after_close_ms() -> u64 {
    1_000
}
fn default_reconnect_after_error_ms() -> u64 {
    3_000
}
fn default_yield_every() -> usize {
    5
}
fn default_channel_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoContinueConfig {
    /// Ceiling on automatic continuations between two terminal events.
    #[serde(default = "default_max_auto_continues")]
    pub max_auto_continues: u32,
    #[serde(default = "default_auto_continue_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_continue_prompt")]
    pub prompt: String,
}

impl Default for AutoContinueConfig {
    fn default() -> Self {
        Self {
            max_auto_continues: default_max_auto_continues(),
            delay_ms: default_auto_continue_delay_ms(),
            prompt: default_continue_prompt(),
        }
    }
}

impl AutoContinueConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_auto_continues > 0 && self.prompt.trim().is_empty() {
            return Err(ConfigError::Validation(
                "auto_continue.prompt must not be empty when max_auto_continues > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

fn default_max_auto_continues() -> u32 {
    3
}
fn default_auto_continue_delay_ms() -> u64 {
    500
}
fn default_continue_prompt() -> String {
    "Please continue from where you left off.".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapabilitiesConfig {
    /// JSON file for learned model limits. Defaults to
    /// `~/.studio-sync/capabilities.json`.
    #[serde(default)]
    pub store_path: Option<String>,
}

impl CapabilitiesConfig {
    pub fn resolved_path(&self) -> PathBuf {
        match &self.store_path {
            Some(p) => PathBuf::from(p),
            None => config_dir().join("capabilities.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
