//! Redis cache integration
//!
//! Holds serialized `Ready` rankings in front of the rank store. Ready is a
//! terminal state, so a cached ranking only goes stale when the registry is
//! reseeded; the TTL bounds that window.

use crate::config::RedisConfig;
use crate::errors::{AppError, Result};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// Redis cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL (redis://host:port)
    pub url: String,
    /// Default TTL in seconds; 0 stores without expiry
    pub default_ttl_secs: u64,
    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            default_ttl_secs: 3600,
            key_prefix: "catrank".to_string(),
        }
    }
}

impl CacheConfig {
    /// Build from application config; `None` when no Redis URL is configured
    pub fn from_app(config: &RedisConfig) -> Option<Self> {
        config.url.as_ref().map(|url| Self {
            url: url.clone(),
            default_ttl_secs: config.ttl_secs,
            key_prefix: config.key_prefix.clone(),
        })
    }
}

/// Redis cache client
pub struct Cache {
    connection: RwLock<MultiplexedConnection>,
    config: CacheConfig,
}

impl Cache {
    /// Create a new cache client
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to create Redis client: {}", e)
            })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            config,
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let value: Option<String> = conn.get(&full_key).await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to get key '{}': {}", full_key, e),
            })?;

        match value {
            Some(json) => {
                let parsed = serde_json::from_str(&json)
                    .map_err(|e| AppError::CacheError {
                        message: format!("Failed to parse cached value: {}", e),
                    })?;
                debug!(key = %full_key, "Cache hit");
                Ok(Some(parsed))
            }
            None => {
                debug!(key = %full_key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Set a value in cache with default TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.config.default_ttl_secs).await
    }

    /// Set a value in cache with custom TTL (0 stores without expiry)
    async fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let full_key = self.key(key);
        let json = serde_json::to_string(value)
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to serialize value: {}", e),
            })?;

        let mut conn = self.connection.write().await;
        let outcome: redis::RedisResult<()> = if ttl_secs == 0 {
            conn.set(&full_key, &json).await
        } else {
            conn.set_ex(&full_key, &json, ttl_secs).await
        };
        outcome.map_err(|e| AppError::CacheError {
            message: format!("Failed to set key '{}': {}", full_key, e),
        })?;

        debug!(key = %full_key, ttl_secs, "Cache set");
        Ok(())
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// Cache key builder helpers
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Build the key for a category's finished ranking.
    ///
    /// Titles are arbitrary Unicode, so the key carries their SHA-256.
    pub fn ranking(category: &str) -> String {
        let digest = Sha256::digest(category.as_bytes());
        format!("ranking:{}", hex::encode(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranking_key() {
        let key = keys::ranking("Физика");
        assert!(key.starts_with("ranking:"));
        assert_eq!(key.len(), "ranking:".len() + 64);
        assert_eq!(key, keys::ranking("Физика"));
        assert_ne!(key, keys::ranking("Химия"));
    }

    #[test]
    fn test_config_from_app() {
        let mut redis = RedisConfig::default();
        assert!(CacheConfig::from_app(&redis).is_none());

        redis.url = Some("redis://cache:6379".to_string());
        redis.ttl_secs = 0;
        let config = CacheConfig::from_app(&redis).unwrap();
        assert_eq!(config.url, "redis://cache:6379");
        assert_eq!(config.default_ttl_secs, 0);
    }
}
