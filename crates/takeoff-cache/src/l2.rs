//! L2: distributed suggestion cache with TTL.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `REDIS_ENABLED`: Set to "false" to disable the Redis tier (default: true)
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
//! - `TAKEOFF_L2_TTL_SECS`: Entry TTL in seconds (default: 86400)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use takeoff_core::{defaults, CacheTier, ClassificationSuggestion, Error, Result};

/// Shared cache of suggestions keyed by pattern fingerprint.
///
/// Every failure is reported as [`Error::CacheUnavailable`]; the hierarchy
/// absorbs it and degrades to the next tier.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Result<Option<ClassificationSuggestion>>;

    /// Store with the configured TTL, replacing any previous value.
    async fn set(&self, fingerprint: &str, suggestion: &ClassificationSuggestion) -> Result<()>;

    async fn delete(&self, fingerprint: &str) -> Result<()>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

fn unavailable(reason: impl std::fmt::Display) -> Error {
    Error::CacheUnavailable {
        tier: CacheTier::L2,
        reason: reason.to_string(),
    }
}

// =============================================================================
// REDIS
// =============================================================================

/// [`DistributedCache`] backed by Redis (`GET` / `SET EX` / `DEL`, JSON values).
#[derive(Clone)]
pub struct RedisSuggestionCache {
    inner: Arc<RedisInner>,
}

struct RedisInner {
    /// Redis connection manager (None if disabled or unreachable at startup).
    connection: RwLock<Option<ConnectionManager>>,
    ttl_seconds: u64,
    prefix: String,
}

impl RedisSuggestionCache {
    /// Connect to Redis.
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        info!(
            subsystem = "cache",
            component = "l2_redis",
            ttl_secs = ttl.as_secs(),
            "Redis suggestion cache enabled"
        );
        Ok(Self::with_connection(Some(conn), ttl))
    }

    /// Create from environment configuration.
    ///
    /// Returns `None` when Redis is disabled or cannot be reached; the
    /// hierarchy then runs without an L2 tier.
    pub async fn from_env() -> Option<Self> {
        let enabled = std::env::var("REDIS_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        if !enabled {
            info!("Redis suggestion cache disabled via REDIS_ENABLED=false");
            return None;
        }

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| defaults::REDIS_URL.to_string());
        let ttl_seconds: u64 = std::env::var("TAKEOFF_L2_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::L2_TTL_SECS);

        match Self::connect(&redis_url, Duration::from_secs(ttl_seconds)).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("Failed to connect to Redis, L2 disabled: {}", e);
                None
            }
        }
    }

    /// Create a disconnected cache (for testing); every call is unavailable.
    pub fn disabled() -> Self {
        Self::with_connection(None, Duration::from_secs(defaults::L2_TTL_SECS))
    }

    fn with_connection(connection: Option<ConnectionManager>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RedisInner {
                connection: RwLock::new(connection),
                ttl_seconds: ttl.as_secs().max(1),
                prefix: defaults::L2_KEY_PREFIX.to_string(),
            }),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.connection.read().await.is_some()
    }

    /// Redis key for a fingerprint.
    pub fn cache_key(&self, fingerprint: &str) -> String {
        format!("{}{}", self.inner.prefix, fingerprint)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.inner.ttl_seconds)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.inner
            .connection
            .read()
            .await
            .clone()
            .ok_or_else(|| unavailable("not connected"))
    }
}

#[async_trait]
impl DistributedCache for RedisSuggestionCache {
    async fn get(&self, fingerprint: &str) -> Result<Option<ClassificationSuggestion>> {
        let mut conn = self.connection().await?;
        let key = self.cache_key(fingerprint);

        let data = conn
            .get::<_, Option<String>>(&key)
            .await
            .map_err(unavailable)?;
        match data {
            Some(data) => match serde_json::from_str(&data) {
                Ok(suggestion) => {
                    debug!("Cache HIT: {}", key);
                    Ok(Some(suggestion))
                }
                Err(e) => {
                    // Undecodable entries (older schema) count as a miss
                    warn!("Cache deserialization error for {}: {}", key, e);
                    Ok(None)
                }
            },
            None => {
                debug!("Cache MISS: {}", key);
                Ok(None)
            }
        }
    }

    async fn set(&self, fingerprint: &str, suggestion: &ClassificationSuggestion) -> Result<()> {
        let mut conn = self.connection().await?;
        let key = self.cache_key(fingerprint);
        let serialized = serde_json::to_string(suggestion)?;

        conn.set_ex::<_, _, ()>(&key, serialized, self.inner.ttl_seconds)
            .await
            .map_err(unavailable)?;
        debug!("Cache SET: {} (TTL: {}s)", key, self.inner.ttl_seconds);
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let key = self.cache_key(fingerprint);
        conn.del::<_, ()>(&key).await.map_err(unavailable)?;
        debug!("Cache INVALIDATE: {}", key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

/// In-process [`DistributedCache`] with TTL semantics.
///
/// Values are stored as JSON like in Redis. Used for single-node deployments
/// and tests; [`set_available`](Self::set_available) simulates an outage.
#[derive(Clone)]
pub struct MemoryDistributedCache {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
    ttl: Duration,
    available: Arc<AtomicBool>,
}

impl MemoryDistributedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|(_, exp)| *exp > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable("memory cache marked unavailable"))
        }
    }
}

impl Default for MemoryDistributedCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(defaults::L2_TTL_SECS))
    }
}

#[async_trait]
impl DistributedCache for MemoryDistributedCache {
    async fn get(&self, fingerprint: &str) -> Result<Option<ClassificationSuggestion>> {
        self.check_available()?;
        let mut entries = self.lock();
        let Some((data, expires_at)) = entries.get(fingerprint) else {
            return Ok(None);
        };
        if *expires_at <= Instant::now() {
            entries.remove(fingerprint);
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(data)?))
    }

    async fn set(&self, fingerprint: &str, suggestion: &ClassificationSuggestion) -> Result<()> {
        self.check_available()?;
        let data = serde_json::to_string(suggestion)?;
        self.lock()
            .insert(fingerprint.to_string(), (data, Instant::now() + self.ttl));
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<()> {
        self.check_available()?;
        self.lock().remove(fingerprint);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use takeoff_core::{lifecycle, NewSuggestion};

    fn suggestion() -> ClassificationSuggestion {
        lifecycle::create(
            uuid::Uuid::now_v7(),
            NewSuggestion {
                pattern_fingerprint: Some("fp".to_string()),
                suggested_commodity_code: None,
                suggested_pricing_code: Some("P-1".to_string()),
                derived_items: vec![],
                reasoning_summary: "r".to_string(),
            },
            chrono::Utc::now(),
        )
        .0
    }

    #[test]
    fn test_cache_key_prefix() {
        let cache = RedisSuggestionCache::disabled();
        assert_eq!(cache.cache_key("abc"), "tk:suggestion:abc");
        assert_eq!(cache.ttl(), Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn test_disabled_redis_is_unavailable() {
        let cache = RedisSuggestionCache::disabled();
        assert!(!cache.is_connected().await);
        let err = cache.get("fp").await.unwrap_err();
        assert!(matches!(
            err,
            Error::CacheUnavailable {
                tier: CacheTier::L2,
                ..
            }
        ));
        assert!(cache.set("fp", &suggestion()).await.is_err());
        assert!(cache.delete("fp").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_roundtrip_and_delete() {
        let cache = MemoryDistributedCache::default();
        let s = suggestion();
        cache.set("fp", &s).await.unwrap();
        assert_eq!(cache.get("fp").await.unwrap(), Some(s));
        cache.delete("fp").await.unwrap();
        assert_eq!(cache.get("fp").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let cache = MemoryDistributedCache::new(Duration::from_millis(20));
        cache.set("fp", &suggestion()).await.unwrap();
        assert_eq!(cache.len(), 1);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("fp").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_memory_outage() {
        let cache = MemoryDistributedCache::default();
        cache.set_available(false);
        assert!(matches!(
            cache.set("fp", &suggestion()).await,
            Err(Error::CacheUnavailable { .. })
        ));
        cache.set_available(true);
        assert!(cache.set("fp", &suggestion()).await.is_ok());
    }
}
