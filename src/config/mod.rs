use crate::error::{GatewayError, Result};
use crate::rate_limit::types::RateLimitConfig;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `NUDM__SERVER__PORT=3000`
pub const ENV_PREFIX: &str = "NUDM";

/// Main gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Admission control for the authentication routes
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Document store configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Prometheus metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-request deadline in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long graceful shutdown may take before the process is forced down
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Maximum accepted request body size
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

/// Document store configuration
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URI (`redis://...` or `memory://`)
    #[serde(default = "default_database_uri", deserialize_with = "deserialize_secret")]
    pub uri: Secret<String>,
    /// Database name, used as the key namespace
    #[serde(default = "default_database_name")]
    pub name: String,
    /// Collection used when a lookup does not name one
    #[serde(default = "default_collection")]
    pub collection: String,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Log output configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Expose `GET /metrics` in Prometheus text format
    #[serde(default)]
    pub enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_body_limit_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_database_uri() -> Secret<String> {
    Secret::new("redis://127.0.0.1:6379".to_string())
}

fn default_database_name() -> String {
    "udm".to_string()
}

fn default_collection() -> String {
    "subscribers".to_string()
}

/// Deserialize a plain string into a secret so it never shows up in `Debug` output
fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Secret<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(Secret::new(s))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            body_limit_bytes: default_body_limit_bytes(),
        }
    }
}

impl ServerConfig {
    /// Listener address in `host:port` form
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: default_database_uri(),
            name: default_database_name(),
            collection: default_collection(),
        }
    }
}

impl DatabaseConfig {
    /// Build a config pointing at the given URI
    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: Secret::new(uri.into()),
            ..Self::default()
        }
    }

    /// URI scheme (`redis`, `memory`, ...) which is safe to log
    pub fn scheme(&self) -> &str {
        self.uri
            .expose_secret()
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .unwrap_or("")
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("uri", &format!("{}://[REDACTED]", self.scheme()))
            .field("name", &self.name)
            .field("collection", &self.collection)
            .finish()
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file (optional) layered under
    /// `NUDM__*` environment variables
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to load config: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.request_timeout_ms == 0 {
            return Err(GatewayError::Config(
                "Request timeout must be > 0".to_string(),
            ));
        }

        self.rate_limit.validate()?;

        if self.database.name.is_empty() {
            return Err(GatewayError::Config(
                "Database name cannot be empty".to_string(),
            ));
        }
        if self.database.collection.is_empty() {
            return Err(GatewayError::Config(
                "Default collection cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
