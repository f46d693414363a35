//! Layered configuration
//!
//! Precedence, lowest to highest: per-profile defaults, the TOML
//! configuration file, `COURIER_*` environment variables. The production
//! profile enforces the settings that must never be relaxed in production
//! (retry jitter, an encryption key).

use std::path::PathBuf;

use courier_alerts::AlertsConfig;
use courier_delivery::{
    CircuitBreakerConfig, CoordinatorConfig, ProcessorConfig, QueueManagerConfig,
};
use courier_metrics::MetricsConfig;
use serde::Deserialize;
use thiserror::Error;

/// Deployment profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Development,
    Staging,
    Production,
    Test,
}

impl Profile {
    /// Parse a profile name, case-insensitively
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "staging" => Some(Self::Staging),
            "production" | "prod" => Some(Self::Production),
            "test" => Some(Self::Test),
            _ => None,
        }
    }
}

fn default_service_name() -> String {
    "courier".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8080
}

/// Service identity and bind address, consumed by the API facade
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            host: default_host(),
            port: default_port(),
        }
    }
}

const fn default_pool_size() -> u32 {
    10
}

/// Persistence backend settings
///
/// The in-process memory store ignores the DSN; database-backed store
/// implementations consume it.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Database DSN; absent means the in-memory store
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Queue-entry cap for the in-memory store (None = unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            pool_size: default_pool_size(),
            capacity: None,
        }
    }
}

const fn default_rotation_days() -> u32 {
    90
}

/// Security settings
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Key for encrypting destination secrets at rest; mandatory in the
    /// production profile
    #[serde(default)]
    pub encryption_key: Option<String>,
    /// How often webhook signing secrets rotate (days)
    #[serde(default = "default_rotation_days")]
    pub webhook_secret_rotation_days: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            webhook_secret_rotation_days: default_rotation_days(),
        }
    }
}

const fn enabled() -> bool {
    true
}

/// Feature flags for the engine's long-running components
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "enabled")]
    pub scheduler: bool,
    #[serde(default = "enabled")]
    pub circuit_breaker: bool,
    #[serde(default)]
    pub metrics: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            scheduler: true,
            circuit_breaker: true,
            metrics: false,
        }
    }
}

/// Root configuration for the courier engine
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub queue_manager: QueueManagerConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub features: FeatureFlags,
}

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("COURIER_CONFIG points to a non-existent file: {0}")]
    MissingConfigFile(PathBuf),

    #[error("invalid value for {key}: {value}")]
    InvalidEnvValue { key: String, value: String },

    #[error("coordinator.default_priority {0} outside the allowed range 0-10")]
    DefaultPriorityOutOfRange(u8),

    #[error("production profile requires {0}")]
    ProductionRequirement(&'static str),
}

impl CourierConfig {
    /// Load configuration with full layering: defaults, file, environment
    ///
    /// # Errors
    /// Returns an error when the file is unreadable or malformed, an
    /// environment override fails to parse, or a production requirement is
    /// unmet.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match find_config_file()? {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                toml::from_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text, without environment layering
    ///
    /// # Errors
    /// Returns an error when the text is malformed.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `COURIER_*` environment variable overrides
    ///
    /// # Errors
    /// Returns an error when a variable is set to an unparseable value.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        fn parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
            match std::env::var(key) {
                Ok(value) => value.parse().map(Some).map_err(|_| {
                    ConfigError::InvalidEnvValue {
                        key: key.to_string(),
                        value,
                    }
                }),
                Err(_) => Ok(None),
            }
        }

        if let Ok(value) = std::env::var("COURIER_PROFILE") {
            self.profile =
                Profile::parse(&value).ok_or_else(|| ConfigError::InvalidEnvValue {
                    key: "COURIER_PROFILE".to_string(),
                    value,
                })?;
        }
        if let Ok(value) = std::env::var("COURIER_SERVICE_HOST") {
            self.service.host = value;
        }
        if let Some(port) = parsed("COURIER_SERVICE_PORT")? {
            self.service.port = port;
        }
        if let Ok(value) = std::env::var("COURIER_DATABASE_URL") {
            self.store.database_url = Some(value);
        }
        if let Some(size) = parsed("COURIER_MAX_PAYLOAD_BYTES")? {
            self.coordinator.max_payload_bytes = size;
        }
        if let Some(count) = parsed("COURIER_MAX_CONCURRENT_DELIVERIES")? {
            self.processor.max_concurrent_deliveries = count;
        }
        if let Some(secs) = parsed("COURIER_PROCESSING_INTERVAL_SECS")? {
            self.processor.processing_interval_secs = secs;
        }
        if let Some(enabled) = parsed("COURIER_METRICS_ENABLED")? {
            self.metrics.enabled = enabled;
            self.features.metrics = enabled;
        }
        if let Ok(value) = std::env::var("COURIER_METRICS_ENDPOINT") {
            self.metrics.endpoint = value;
        }
        if let Ok(value) = std::env::var("COURIER_ENCRYPTION_KEY") {
            self.security.encryption_key = Some(value);
        }
        Ok(())
    }

    /// Enforce cross-field requirements
    ///
    /// # Errors
    /// Returns an error when the default priority is outside 0-10, or when
    /// the production profile is missing an encryption key or runs without
    /// retry jitter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Out of range here would silently outrank every explicit request,
        // so refuse to start instead
        if self.coordinator.default_priority > 10 {
            return Err(ConfigError::DefaultPriorityOutOfRange(
                self.coordinator.default_priority,
            ));
        }

        if self.profile == Profile::Production {
            if self.security.encryption_key.is_none() {
                return Err(ConfigError::ProductionRequirement("an encryption key"));
            }
            if self.processor.retry.jitter_factor <= 0.0 {
                return Err(ConfigError::ProductionRequirement(
                    "a non-zero retry jitter factor",
                ));
            }
        }
        Ok(())
    }
}

/// Find the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.toml (current working directory)
/// 3. /etc/courier/courier.toml (system-wide config)
fn find_config_file() -> Result<Option<PathBuf>, ConfigError> {
    if let Ok(env_path) = std::env::var("COURIER_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::MissingConfigFile(path));
    }

    for path in [
        PathBuf::from("./courier.toml"),
        PathBuf::from("/etc/courier/courier.toml"),
    ] {
        if path.exists() {
            return Ok(Some(path));
        }
    }

    Ok(None)
}
