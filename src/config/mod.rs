//! Configuration management.

mod file_config;

pub use file_config::ConfigFileError;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `MCP_SESSIONS_SERVER__PORT=8080`
pub const ENV_PREFIX: &str = "MCP_SESSIONS";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Session lifecycle settings
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Client transport settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Path the protocol endpoint is mounted at
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Name reported in `initialize` responses
    #[serde(default = "default_server_name")]
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            endpoint: default_endpoint(),
            name: default_server_name(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_endpoint() -> String {
    "/mcp".to_string()
}

fn default_server_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

/// Session store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Sessions idle longer than this are expired
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often the background sweep runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Upper bound on live sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Per-session request quota; unlimited when unset
    #[serde(default)]
    pub rate_limit_per_second: Option<u32>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            max_sessions: default_max_sessions(),
            rate_limit_per_second: None,
        }
    }
}

impl SessionsConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Never zero, so the sweeper interval is always valid
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Effective session limit; a store always holds at least one session
    pub fn capacity(&self) -> usize {
        self.max_sessions.max(1)
    }
}

fn default_idle_timeout() -> u64 {
    900 // 15 minutes
}

fn default_sweep_interval() -> u64 {
    300 // 5 minutes
}

fn default_max_sessions() -> usize {
    1000
}

/// Client transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint URL
    #[serde(default = "default_client_endpoint")]
    pub endpoint: String,

    /// Per-attempt timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Total attempts per request, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubled on each further retry
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_client_endpoint(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

fn default_client_endpoint() -> String {
    "http://127.0.0.1:3000/mcp".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    2000
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "json" for structured output, anything else for plain text
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from an optional file, with environment overrides
pub fn load_config(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    settings.try_deserialize()
}

/// Locate a config file: `./mcp-sessions.toml` first, then the user config dir
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("mcp-sessions.toml");
    if local.is_file() {
        return Some(local);
    }

    let user = dirs::config_dir()?.join("mcp-sessions").join("config.toml");
    user.is_file().then_some(user)
}

/// Default location used by `init-config`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("mcp-sessions").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("mcp-sessions.toml"))
}
