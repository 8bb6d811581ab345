use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Shared key/value cache with absolute per-entry expiry.
#[async_trait]
pub trait ExpiringCache: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), anyhow::Error>;
    /// `None` when the key is absent or has expired.
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    /// Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl ExpiringCache for RedisCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Failed to delete cache key: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-memory cache for tests. Honours TTLs.
#[derive(Default)]
pub struct MockCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExpiringCache for MockCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), anyhow::Error> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?;

        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_cache_returns_value_before_expiry() -> Result<(), anyhow::Error> {
        let cache = MockCache::new();
        cache.set("k", "v", Duration::from_secs(60)).await?;
        assert_eq!(cache.get("k").await?, Some("v".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn mock_cache_drops_expired_entries() -> Result<(), anyhow::Error> {
        let cache = MockCache::new();
        cache.set("k", "v", Duration::from_millis(10)).await?;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn mock_cache_delete_is_idempotent() -> Result<(), anyhow::Error> {
        let cache = MockCache::new();
        cache.set("k", "v", Duration::from_secs(60)).await?;
        cache.delete("k").await?;
        cache.delete("k").await?;
        assert_eq!(cache.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn redis_cache_round_trip() -> Result<(), anyhow::Error> {
        let cache = RedisCache::new(&crate::config::RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        })
        .await?;
        cache.set("auth-test:key", "v", Duration::from_secs(5)).await?;
        assert_eq!(cache.get("auth-test:key").await?, Some("v".to_string()));
        Ok(())
    }
}
