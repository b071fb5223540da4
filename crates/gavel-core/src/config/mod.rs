//! Application configuration with layered loading.
//!
//! Configuration is assembled in this order, later layers overriding earlier
//! ones:
//!
//! 1. Compiled defaults (the `Default` impls below)
//! 2. TOML file named by the `GAVEL_CONFIG` env var (default
//!    `config/config.toml`, optional)
//! 3. Environment variables with the `GAVEL__` prefix and `__` as the nesting
//!    separator, e.g. `GAVEL__SERVER__BIND_PORT=9000` or
//!    `GAVEL__AUTH__TOKEN_SECRET=...`
//!
//! Invalid configurations (zero TTL, empty credential set with auth enabled,
//! unknown log format) are rejected by [`AppConfig::validate`] at startup
//! rather than failing later mid-request.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind to. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on. Must be greater than 0. Defaults to `8080`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum number of concurrently processed requests. Defaults to `100`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Maximum accepted request body size in bytes. Defaults to 64 KiB;
    /// a feature record is a few hundred bytes, a batch a few hundred more.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

fn default_max_concurrent_requests() -> usize {
    100
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

/// Credential validation settings.
///
/// Both credential shapes can be active at once: static API keys for service
/// callers and signed bearer tokens for user-facing clients.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Whether requests must authenticate. Defaults to `false`.
    #[serde(default)]
    pub enabled: bool,

    /// Accepted static API keys (compared in constant time).
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// HMAC-SHA256 secret for bearer tokens. Empty disables token auth.
    #[serde(default)]
    pub token_secret: String,
}

/// Price cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry time-to-live in seconds. Must be greater than 0.
    /// Defaults to `3600`.
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Maximum number of cached entries before LRU eviction.
    /// Must be greater than 0. Defaults to `10000`.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Interval of the background expiry sweep in seconds.
    /// Defaults to `60`.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

/// Model invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Budget for a single prediction in milliseconds. Must be greater
    /// than 0. Defaults to `2000`.
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,

    /// Model identifier reported on the readiness endpoint.
    #[serde(default = "default_model_version")]
    pub version: String,
}

fn default_inference_timeout_ms() -> u64 {
    2000
}

fn default_model_version() -> String {
    "baseline-1".to_string()
}

/// Metrics exposure settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the `/metrics` endpoint is served. Defaults to `true`.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter. Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Root configuration for the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment name. Defaults to `"development"`.
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl_seconds(),
            capacity: default_cache_capacity(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            inference_timeout_ms: default_inference_timeout_ms(),
            version: default_model_version(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: default_metrics_enabled() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            cache: CacheConfig::default(),
            model: ModelConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be parsed, or if
    /// the merged configuration does not deserialize.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                File::with_name(&config_path.as_ref().to_string_lossy()).required(false),
            )
            .add_source(Environment::with_prefix("GAVEL").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Loads configuration from the path in `GAVEL_CONFIG`, defaulting to
    /// `config/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if loading or parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("GAVEL_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message for the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }
        if self.server.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }
        if self.server.max_body_bytes == 0 {
            return Err("Max body size must be greater than 0".to_string());
        }
        if self.cache.ttl_seconds == 0 {
            return Err("Cache TTL must be greater than 0".to_string());
        }
        if self.cache.capacity == 0 {
            return Err("Cache capacity must be greater than 0".to_string());
        }
        if self.cache.sweep_interval_seconds == 0 {
            return Err("Cache sweep interval must be greater than 0".to_string());
        }
        if self.model.inference_timeout_ms == 0 {
            return Err("Inference timeout must be greater than 0".to_string());
        }
        if self.auth.enabled && self.auth.api_keys.is_empty() && self.auth.token_secret.is_empty()
        {
            return Err(
                "Auth is enabled but no API keys or token secret are configured".to_string()
            );
        }
        if self.auth.api_keys.iter().any(String::is_empty) {
            return Err("API keys must not be empty strings".to_string());
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }
        Ok(())
    }

    /// Parsed socket address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error string when `bind_address:bind_port` does not parse.
    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
            .parse()
            .map_err(|_| {
                format!(
                    "Invalid socket address: {}:{}",
                    self.server.bind_address, self.server.bind_port
                )
            })
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    #[must_use]
    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_seconds)
    }

    #[must_use]
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.model.inference_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.environment, "development");
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.bind_port, 8080);
        assert_eq!(config.cache.ttl_seconds, 3600);
        assert_eq!(config.cache.capacity, 10_000);
        assert_eq!(config.model.inference_timeout_ms, 2000);
        assert!(config.metrics.enabled);
        assert!(!config.auth.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_knobs() {
        let mut config = AppConfig::default();
        config.cache.ttl_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.cache.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.bind_port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.inference_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_requires_credentials_when_auth_enabled() {
        let mut config = AppConfig::default();
        config.auth.enabled = true;
        assert!(config.validate().is_err());

        config.auth.api_keys = vec!["demo-key".to_string()];
        assert!(config.validate().is_ok());

        config.auth.api_keys.clear();
        config.auth.token_secret = "secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_unknown_log_format() {
        let mut config = AppConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
environment = "production"

[server]
bind_port = 9090

[auth]
enabled = true
api_keys = ["k1", "k2"]

[cache]
ttl_seconds = 600
capacity = 500
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.environment, "production");
        assert_eq!(config.server.bind_port, 9090);
        assert_eq!(config.auth.api_keys.len(), 2);
        assert_eq!(config.cache.ttl_seconds, 600);
        assert_eq!(config.cache.capacity, 500);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.model.inference_timeout_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_accessors() {
        let config = AppConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.inference_timeout(), Duration::from_millis(2000));
        assert_eq!(config.cache_sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_socket_addr_parses() {
        let config = AppConfig::default();
        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let mut bad = AppConfig::default();
        bad.server.bind_address = "not an address".to_string();
        assert!(bad.socket_addr().is_err());
    }
}
