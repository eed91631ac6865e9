//! Configuration management for CategoryRank services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis result cache configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Remote page source (MediaWiki API) configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Ranking engine configuration
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Catalog refresh configuration
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
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
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL; the result cache is disabled when unset
    pub url: Option<String>,

    /// TTL for cached rankings in seconds (0 keeps them until evicted)
    #[serde(default = "default_redis_ttl")]
    pub ttl_secs: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_redis_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// MediaWiki API endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Localized category namespace, e.g. "Category" or "Категория"
    #[serde(default = "default_category_namespace")]
    pub category_namespace: String,

    /// Thumbnail width requested from pageimages
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,

    /// First retry delay in milliseconds
    #[serde(default = "default_retry_initial")]
    pub retry_initial_ms: u64,

    /// Total time budget for retries of one request, in seconds
    #[serde(default = "default_retry_budget")]
    pub retry_budget_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RankingConfig {
    /// Teleport probability b in (0, 1)
    #[serde(default = "default_damping")]
    pub damping: f64,

    /// Upper bound on a single category build, in seconds
    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,

    /// Page size when the request omits one
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Largest accepted page size
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Only categories with at least this many members are seeded
    #[serde(default = "default_min_members")]
    pub min_members: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full EnvFilter directive
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
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_ttl() -> u64 { 3600 }
fn default_redis_prefix() -> String { "catrank".to_string() }
fn default_api_url() -> String { "https://ru.wikipedia.org/w/api.php".to_string() }
fn default_user_agent() -> String { format!("catrank/{}", env!("CARGO_PKG_VERSION")) }
fn default_category_namespace() -> String { "Категория".to_string() }
fn default_thumbnail_size() -> u32 { 200 }
fn default_source_timeout() -> u64 { 30 }
fn default_retry_initial() -> u64 { 500 }
fn default_retry_budget() -> u64 { 60 }
fn default_damping() -> f64 { 0.15 }
fn default_build_timeout() -> u64 { 600 }
fn default_page_size() -> usize { 12 }
fn default_max_page_size() -> usize { 500 }
fn default_min_members() -> u32 { 500 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "catrank".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            ttl_secs: default_redis_ttl(),
            key_prefix: default_redis_prefix(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            user_agent: default_user_agent(),
            category_namespace: default_category_namespace(),
            thumbnail_size: default_thumbnail_size(),
            timeout_secs: default_source_timeout(),
            retry_initial_ms: default_retry_initial(),
            retry_budget_secs: default_retry_budget(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            damping: default_damping(),
            build_timeout_secs: default_build_timeout(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            min_members: default_min_members(),
        }
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
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("database.url", "postgres://localhost/catrank")?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RANKING__DAMPING=0.2
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the build timeout as Duration
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.ranking.build_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/catrank".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            redis: RedisConfig::default(),
            source: SourceConfig::default(),
            ranking: RankingConfig::default(),
            catalog: CatalogConfig::default(),
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
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.ranking.damping, 0.15);
        assert_eq!(config.ranking.default_page_size, 12);
        assert_eq!(config.catalog.min_members, 500);
        assert!(config.redis.url.is_none());
    }

    #[test]
    fn test_build_timeout() {
        let mut config = AppConfig::default();
        config.ranking.build_timeout_secs = 5;
        assert_eq!(config.build_timeout(), Duration::from_secs(5));
    }
}
