use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Keys to invalidate: one exact key, or every key under a prefix
/// (written `prefix*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKeyPattern {
    Exact(String),
    Prefix(String),
}

impl CacheKeyPattern {
    pub fn parse(key: &str) -> Result<Self, anyhow::Error> {
        let key = key.trim();
        match key.strip_suffix('*') {
            Some(prefix) if prefix.is_empty() || prefix.contains('*') => Err(anyhow::anyhow!(
                "Refusing wildcard cache key '{}'",
                key
            )),
            Some(prefix) => Ok(CacheKeyPattern::Prefix(prefix.to_string())),
            None if key.is_empty() => Err(anyhow::anyhow!("Cache key must not be empty")),
            None if key.contains('*') => Err(anyhow::anyhow!(
                "Wildcards are only supported as a trailing '*': '{}'",
                key
            )),
            None => Ok(CacheKeyPattern::Exact(key.to_string())),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            CacheKeyPattern::Exact(exact) => key == exact,
            CacheKeyPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }
}

pub fn user_cache_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error>;

    /// Returns how many keys were removed; removing nothing is not an error.
    async fn delete(&self, pattern: &CacheKeyPattern) -> Result<u64, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis cache");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis cache");

        Ok(Self {
            _client: client,
            manager,
        })
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to scan cache keys: {}", e))?;

            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to delete cache keys: {}", e))?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn delete(&self, pattern: &CacheKeyPattern) -> Result<u64, anyhow::Error> {
        match pattern {
            CacheKeyPattern::Exact(key) => {
                let mut conn = self.manager.clone();
                redis::cmd("DEL")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to delete cache key: {}", e))
            }
            CacheKeyPattern::Prefix(prefix) => self.delete_prefix(prefix).await,
        }
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// Process-local cache honouring TTLs.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>, anyhow::Error> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory cache mutex poisoned: {}", e))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock()
            .map(|entries| {
                entries
                    .get(key)
                    .is_some_and(|(_, expires)| *expires > Instant::now())
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let expires = Instant::now() + Duration::from_secs(ttl_seconds.max(1));
        self.lock()?
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn delete(&self, pattern: &CacheKeyPattern) -> Result<u64, anyhow::Error> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        Ok((before - entries.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.lock().map(|_| ())
    }
}
