//! Configuration management for the recommendation services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Predictor (GNN service) configuration
    #[serde(default)]
    pub predictor: PredictorConfig,

    /// Synchronization configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Create missing tables on startup
    #[serde(default = "default_enabled")]
    pub create_schema: bool,
}

/// How the predictor expresses its match score
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScoreScale {
    /// 0 to 100
    #[default]
    Percent,
    /// 0.0 to 1.0
    Fraction,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PredictorConfig {
    /// Predictor provider: http, mock
    #[serde(default = "default_predictor_provider")]
    pub provider: String,

    /// Base URL of the GNN service
    #[serde(default = "default_predictor_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_predictor_timeout")]
    pub timeout_secs: u64,

    /// Upper bound for one predict call including retries
    #[serde(default = "default_predictor_deadline")]
    pub call_deadline_secs: u64,

    /// Maximum retries for transient failures
    #[serde(default = "default_predictor_retries")]
    pub max_retries: u32,

    /// Scale of `match_percentage` in predictor responses
    #[serde(default)]
    pub score_scale: ScoreScale,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Users synchronized concurrently by a batch run
    #[serde(default = "default_sync_concurrency")]
    pub concurrency: usize,

    /// Ask the predictor to retrain before a batch run
    #[serde(default = "default_enabled")]
    pub retrain_before_batch: bool,

    /// Interval between batch runs in daemon mode
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Serialize overlapping runs for the same user
    #[serde(default = "default_enabled")]
    pub serialize_per_user: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_predictor_provider() -> String { "http".to_string() }
fn default_predictor_url() -> String { "http://gnn-service".to_string() }
fn default_predictor_timeout() -> u64 { 20 }
fn default_predictor_deadline() -> u64 { 60 }
fn default_predictor_retries() -> u32 { 2 }
fn default_sync_concurrency() -> usize { 4 }
fn default_sync_interval() -> u64 { 86_400 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "diploma-recommender".to_string() }
fn default_enabled() -> bool { true }

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            provider: default_predictor_provider(),
            base_url: default_predictor_url(),
            timeout_secs: default_predictor_timeout(),
            call_deadline_secs: default_predictor_deadline(),
            max_retries: default_predictor_retries(),
            score_scale: ScoreScale::default(),
        }
    }
}

impl PredictorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn call_deadline(&self) -> Duration {
        Duration::from_secs(self.call_deadline_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_sync_concurrency(),
            retrain_before_batch: default_enabled(),
            interval_secs: default_sync_interval(),
            serialize_per_user: default_enabled(),
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            .set_default("database.url", "sqlite://diplomas.db?mode=rwc")?
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__PREDICTOR__BASE_URL=http://localhost:8000
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://diplomas.db?mode=rwc".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                create_schema: default_enabled(),
            },
            predictor: PredictorConfig::default(),
            sync: SyncConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.predictor.score_scale, ScoreScale::Percent);
        assert_eq!(config.predictor.base_url, "http://gnn-service");
        assert_eq!(config.sync.concurrency, 4);
        assert!(config.sync.serialize_per_user);
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "sqlite://diplomas.db?mode=rwc");
    }

    #[test]
    fn test_score_scale_parses_lowercase() {
        let scale: ScoreScale = serde_json::from_str("\"fraction\"").unwrap();
        assert_eq!(scale, ScoreScale::Fraction);
    }

    #[test]
    fn test_sections_fall_back_to_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "database": { "url": "postgres://localhost/diplomas" },
            "predictor": { "base_url": "http://localhost:8000", "max_retries": 0 }
        }))
        .unwrap();

        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.predictor.max_retries, 0);
        assert_eq!(config.predictor.timeout(), Duration::from_secs(20));
        assert_eq!(config.sync.interval(), Duration::from_secs(86_400));
        assert_eq!(config.observability.service_name, "diploma-recommender");
    }
}
