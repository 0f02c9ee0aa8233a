//! # Gateway Resilience
//!
//! Resilience patterns guarding every backend call:
//! - Circuit breaker per service, with a registry shared across requests
//! - Retry with exponential backoff and jitter
//! - Per-attempt and overall timeouts
//! - A policy engine composing the layers in a fixed order
//! - Response caching for idempotent reads, in memory or in Redis

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cache_key;
pub mod circuit_breaker;
pub mod memory_store;
pub mod policy;
pub mod redis_store;
pub mod registry;
pub mod retry;
pub mod timeout;

pub use cache::{CacheError, CacheStore, CachedResponse, ResponseCache};
pub use cache_key::{CacheKey, CacheKeyGenerator, CREDENTIAL_HEADERS};
pub use circuit_breaker::{
    BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use memory_store::{InMemoryCacheStore, MemoryStoreStats};
pub use policy::{with_circuit_breaker, Attempt, AttemptResult, ResiliencePolicyEngine};
pub use redis_store::RedisCacheStore;
pub use registry::BreakerRegistry;
pub use retry::{with_retry, RetryPolicy};
pub use timeout::{run_with_timeout, with_attempt_timeout, with_overall_timeout};
