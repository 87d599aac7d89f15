//! Server configuration
//!
//! A TOML file with one section per concern. `DOCFEED_*` environment
//! variables win over the file; everything has a default so an empty file
//! (or none at all) is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::manager::ManagerConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP and WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Mount point of the WebSocket endpoint; the side channel lives
    /// at `<path>/subscribe`
    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_path() -> String {
    "/mydb".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            cors_origins: Vec::new(),
            max_connections: default_max_connections(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Subscription lifecycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionsConfig {
    /// How long an exposed subscription waits for its connection
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    60_000
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Side-channel authentication
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Shared secret for request signatures; the side channel is disabled
    /// without one
    pub secret: Option<String>,
}

/// Broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

fn default_channel_prefix() -> String {
    "op:".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            channel_prefix: default_channel_prefix(),
        }
    }
}

/// `[logging]`; `RUST_LOG` takes precedence over `level`
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Parse and validate one file, without environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        config.validate()?;

        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// First readable file of the user config dir, `/etc/docfeed` and the
    /// working directory; defaults when none loads
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("docfeed").join("config.toml")),
            Some(PathBuf::from("/etc/docfeed/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    pub fn subscription_timeout(&self) -> Duration {
        Duration::from_millis(self.subscriptions.timeout_ms)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.path must start with '/': {:?}",
                self.server.path
            )));
        }
        if self.subscriptions.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "subscriptions.timeout_ms must be positive".to_string(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "server.max_connections must be positive".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be pretty or json: {:?}",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Settings for the subscription manager
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            subscription_timeout: self.subscription_timeout(),
            channel_prefix: self.broker.channel_prefix.clone(),
            max_connections: self.server.max_connections,
        }
    }

    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(host) = std::env::var("DOCFEED_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("DOCFEED_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        // Subscription overrides
        if let Ok(timeout) = std::env::var("DOCFEED_SUBSCRIPTION_TIMEOUT_MS") {
            if let Ok(t) = timeout.parse() {
                self.subscriptions.timeout_ms = t;
            }
        }

        if let Ok(secret) = std::env::var("DOCFEED_SECRET") {
            self.auth.secret = Some(secret).filter(|s| !s.is_empty());
        }

        // Logging overrides
        if let Ok(level) = std::env::var("DOCFEED_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("DOCFEED_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Commented default file, printed by `docfeed --print-config`
pub fn generate_default_config() -> String {
    r#"# docfeed Configuration
#
# Environment variables override these settings:
# - DOCFEED_HOST
# - DOCFEED_PORT
# - DOCFEED_SECRET
# - DOCFEED_SUBSCRIPTION_TIMEOUT_MS
# - DOCFEED_LOG_LEVEL
# - DOCFEED_LOG_FORMAT

[server]
# Server host
host = "0.0.0.0"

# Server port
port = 8090

# WebSocket endpoint; the side channel is served at <path>/subscribe
path = "/mydb"

# Allowed CORS origins (empty allows any origin)
cors_origins = []

# Maximum number of concurrent connections
max_connections = 10000

[subscriptions]
# How long an exposed subscription waits for its connection (ms)
timeout_ms = 60000

[auth]
# Shared secret for side-channel request signatures
# secret = "change-me"

[broker]
# Channel name prefix for document mutation feeds
channel_prefix = "op:"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
