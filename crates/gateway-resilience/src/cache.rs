//! Response caching for idempotent reads.
//!
//! [`CacheStore`] is a plain byte store with TTL. [`ResponseCache`] sits on top of it,
//! deciding what is cacheable, encoding responses with `bincode` and absorbing every
//! store failure: a broken cache only ever degrades to a miss.

use crate::cache_key::{CacheKey, CacheKeyGenerator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_config::CacheConfig;
use gateway_core::{BackendResponse, RequestEnvelope};
use gateway_telemetry::{CacheOutcome, MetricsSink, NoopMetrics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Longest expiry recorded in a cached value
const MAX_TTL_DAYS: i64 = 365;

/// Cache store errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Store could not be reached
    #[error("Cache connection error: {message}")]
    Connection {
        /// Error message
        message: String,
    },

    /// Store rejected the command
    #[error("Cache backend error: {message}")]
    Backend {
        /// Error message
        message: String,
    },

    /// Stored value could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Key/value store with per-entry TTL
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Fetch a value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store a value, replacing any previous one
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Delete a value, reporting whether it existed
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete every value whose key starts with `prefix`
    async fn remove_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

    /// Store name for logs
    fn name(&self) -> &'static str;
}

/// Encoded form of a cached backend response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// Response body
    pub body: Vec<u8>,
    /// When the entry was written
    pub stored_at: DateTime<Utc>,
    /// When the entry stops being served
    pub expires_at: DateTime<Utc>,
}

impl CachedResponse {
    /// Capture a backend response
    #[must_use]
    pub fn from_backend(response: &BackendResponse, ttl: Duration) -> Self {
        let stored_at = Utc::now();
        let ceiling = chrono::Duration::days(MAX_TTL_DAYS);
        let ttl = chrono::Duration::from_std(ttl).map_or(ceiling, |ttl| ttl.min(ceiling));
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            stored_at,
            expires_at: stored_at + ttl,
        }
    }

    /// Whether the entry is past its expiry
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Encode for storage
    ///
    /// # Errors
    /// Returns `CacheError::Serialization` if encoding fails
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a stored value
    ///
    /// # Errors
    /// Returns `CacheError::Serialization` for malformed input
    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Back to the pipeline's response type
    #[must_use]
    pub fn into_backend(self) -> BackendResponse {
        BackendResponse {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

/// Failure-absorbing response cache
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    keys: CacheKeyGenerator,
    default_ttl: Duration,
    enabled: bool,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("store", &self.store.name())
            .field("keys", &self.keys)
            .field("default_ttl", &self.default_ttl)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Create an enabled cache
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, keys: CacheKeyGenerator, default_ttl: Duration) -> Self {
        Self {
            store,
            keys,
            default_ttl,
            enabled: true,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Create from configuration
    #[must_use]
    pub fn from_config(config: &CacheConfig, store: Arc<dyn CacheStore>, correlation_header: &str) -> Self {
        let keys = CacheKeyGenerator::new(&config.key_prefix, config.key_length)
            .excluding_header(correlation_header);
        Self::new(store, keys, config.default_ttl).with_enabled(config.enabled)
    }

    /// Enable or disable caching by default
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Attach a metrics sink
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Whether caching is on by default
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Key generator in use
    #[must_use]
    pub fn keys(&self) -> &CacheKeyGenerator {
        &self.keys
    }

    /// Whether the request may read from and write to the cache
    #[must_use]
    pub fn applies_to(&self, envelope: &RequestEnvelope) -> bool {
        envelope.is_get() && envelope.cache_override.unwrap_or(self.enabled)
    }

    /// Derive the key of a request
    #[must_use]
    pub fn key_for(&self, envelope: &RequestEnvelope) -> CacheKey {
        self.keys.generate(envelope)
    }

    /// TTL for a request: the per-request override in minutes, else the default
    #[must_use]
    pub fn ttl_for(&self, envelope: &RequestEnvelope) -> Duration {
        envelope
            .cache_ttl_override_minutes
            .map_or(self.default_ttl, |minutes| {
                Duration::from_secs(u64::from(minutes) * 60)
            })
    }

    /// Look up a response. Errors and undecodable entries count as misses.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CachedResponse> {
        let bytes = match self.store.get(key.storage_key()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.metrics.record_cache_operation(key.service(), CacheOutcome::Miss);
                return None;
            }
            Err(err) => {
                warn!(key = %key, store = self.store.name(), error = %err, "Cache read failed");
                self.metrics.record_cache_operation(key.service(), CacheOutcome::Error);
                return None;
            }
        };

        match CachedResponse::decode(&bytes) {
            Ok(cached) if !cached.is_expired() => {
                debug!(key = %key, "Cache hit");
                self.metrics.record_cache_operation(key.service(), CacheOutcome::Hit);
                Some(cached)
            }
            Ok(_) => {
                debug!(key = %key, "Cache entry expired");
                self.metrics.record_cache_operation(key.service(), CacheOutcome::Miss);
                None
            }
            Err(err) => {
                warn!(key = %key, error = %err, "Discarding undecodable cache entry");
                self.metrics.record_cache_operation(key.service(), CacheOutcome::Error);
                None
            }
        }
    }

    /// Store a successful response. Non-2xx responses and zero TTLs are skipped.
    pub async fn store(&self, key: &CacheKey, response: &BackendResponse, ttl: Duration) {
        if !response.is_success() || ttl.is_zero() {
            return;
        }

        let encoded = match CachedResponse::from_backend(response, ttl).encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(key = %key, error = %err, "Failed to encode response for cache");
                return;
            }
        };

        match self.store.set(key.storage_key(), encoded, ttl).await {
            Ok(()) => {
                debug!(key = %key, ttl_secs = ttl.as_secs(), "Response cached");
                self.metrics.record_cache_operation(key.service(), CacheOutcome::Store);
            }
            Err(err) => {
                warn!(key = %key, store = self.store.name(), error = %err, "Cache write failed");
                self.metrics.record_cache_operation(key.service(), CacheOutcome::Error);
            }
        }
    }

    /// Drop every cached response of a service
    pub async fn invalidate_service(&self, service: &str) -> usize {
        let prefix = self.keys.service_prefix(service);
        match self.store.remove_prefix(&prefix).await {
            Ok(removed) => {
                debug!(service, removed, "Service cache invalidated");
                removed
            }
            Err(err) => {
                warn!(service, error = %err, "Service cache invalidation failed");
                0
            }
        }
    }

    /// Drop one cached response by storage key
    pub async fn invalidate_key(&self, storage_key: &str) -> bool {
        match self.store.remove(storage_key).await {
            Ok(existed) => existed,
            Err(err) => {
                warn!(key = storage_key, error = %err, "Cache key invalidation failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryCacheStore;
    use http::Method;

    struct FailingStore;

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Connection {
                message: "refused".to_string(),
            })
        }
        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Connection {
                message: "refused".to_string(),
            })
        }
        async fn remove(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Connection {
                message: "refused".to_string(),
            })
        }
        async fn remove_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
            Err(CacheError::Connection {
                message: "refused".to_string(),
            })
        }
        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn cache() -> ResponseCache {
        ResponseCache::new(
            Arc::new(InMemoryCacheStore::new(100)),
            CacheKeyGenerator::default(),
            Duration::from_secs(60),
        )
    }

    fn get(path: &str) -> RequestEnvelope {
        RequestEnvelope::builder("users", Method::GET, path).build()
    }

    #[test]
    fn test_encoding_preserves_response() {
        let response = BackendResponse::new(200, "{\"id\":1}").with_header("content-type", "application/json");
        let cached = CachedResponse::from_backend(&response, Duration::from_secs(60));
        let decoded = CachedResponse::decode(&cached.encode().unwrap()).unwrap();
        assert_eq!(decoded, cached);
        assert_eq!(decoded.into_backend(), response);
    }

    #[test]
    fn test_garbage_does_not_decode() {
        assert!(CachedResponse::decode(b"\x01\x02").is_err());
    }

    #[test]
    fn test_applicability() {
        let enabled = cache();
        assert!(enabled.applies_to(&get("/a")));
        assert!(!enabled.applies_to(
            &RequestEnvelope::builder("users", Method::GET, "/a")
                .cache_override(false)
                .build()
        ));
        assert!(!enabled.applies_to(&RequestEnvelope::builder("users", Method::POST, "/a").build()));

        let disabled = cache().with_enabled(false);
        assert!(!disabled.applies_to(&get("/a")));
        assert!(disabled.applies_to(
            &RequestEnvelope::builder("users", Method::GET, "/a")
                .cache_override(true)
                .build()
        ));
    }

    #[test]
    fn test_ttl_override() {
        let cache = cache();
        assert_eq!(cache.ttl_for(&get("/a")), Duration::from_secs(60));
        let envelope = RequestEnvelope::builder("users", Method::GET, "/a")
            .cache_ttl_minutes(5)
            .build();
        assert_eq!(cache.ttl_for(&envelope), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_store_and_lookup() {
        let cache = cache();
        let key = cache.key_for(&get("/a"));
        assert!(cache.lookup(&key).await.is_none());

        cache
            .store(&key, &BackendResponse::new(200, "hello"), Duration::from_secs(60))
            .await;
        let hit = cache.lookup(&key).await.unwrap();
        assert_eq!(hit.body, b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_errors_are_not_stored() {
        let cache = cache();
        let key = cache.key_for(&get("/a"));
        cache
            .store(&key, &BackendResponse::new(500, "boom"), Duration::from_secs(60))
            .await;
        assert!(cache.lookup(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidation() {
        let cache = cache();
        let a = cache.key_for(&get("/a"));
        let b = cache.key_for(&get("/b"));
        let other = cache.key_for(&RequestEnvelope::builder("orders", Method::GET, "/a").build());
        for key in [&a, &b, &other] {
            cache
                .store(key, &BackendResponse::new(200, "x"), Duration::from_secs(60))
                .await;
        }

        assert!(cache.invalidate_key(a.storage_key()).await);
        assert!(!cache.invalidate_key(a.storage_key()).await);
        assert_eq!(cache.invalidate_service("USERS").await, 1);
        assert!(cache.lookup(&b).await.is_none());
        assert!(cache.lookup(&other).await.is_some());
    }

    #[tokio::test]
    async fn test_store_failures_are_absorbed() {
        let cache = ResponseCache::new(
            Arc::new(FailingStore),
            CacheKeyGenerator::default(),
            Duration::from_secs(60),
        );
        let key = cache.key_for(&get("/a"));
        assert!(cache.lookup(&key).await.is_none());
        cache
            .store(&key, &BackendResponse::new(200, "x"), Duration::from_secs(60))
            .await;
        assert_eq!(cache.invalidate_service("users").await, 0);
        assert!(!cache.invalidate_key(key.storage_key()).await);
    }
}
