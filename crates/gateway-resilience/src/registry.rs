//! Breaker registry: one breaker per service, shared by every request to it.

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Holds the circuit breaker of every service the gateway has seen
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a breaker up front, keeping an existing one
    pub fn register(&self, service: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.get_or_create(service, || config)
    }

    /// Get the breaker for a service, creating it with `config` on first use
    pub fn get_or_create(
        &self,
        service: &str,
        config: impl FnOnce() -> CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let key = service.to_lowercase();
        if let Some(existing) = self.breakers.get(&key) {
            return Arc::clone(existing.value());
        }
        let breaker = self
            .breakers
            .entry(key)
            .or_insert_with(|| {
                debug!(service, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(service, config()))
            });
        Arc::clone(breaker.value())
    }

    /// Look up an existing breaker
    #[must_use]
    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .get(&service.to_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of breakers
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker exists yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshot of every breaker, sorted by service
    #[must_use]
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;

    #[tokio::test]
    async fn test_same_breaker_per_service() {
        let registry = BreakerRegistry::new();
        let a = registry.register("Users", CircuitBreakerConfig::default());
        let b = registry.get_or_create("users", CircuitBreakerConfig::default);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_breakers_are_independent() {
        let registry = BreakerRegistry::new();
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        };
        let users = registry.register("users", config);
        registry.register("orders", config);

        users.acquire().unwrap().failure();

        let snapshots = registry.snapshots();
        assert_eq!(snapshots[0].service, "orders");
        assert_eq!(snapshots[0].state, CircuitState::Closed);
        assert_eq!(snapshots[1].state, CircuitState::Open);
    }

    #[test]
    fn test_get_unknown() {
        assert!(BreakerRegistry::new().get("nope").is_none());
    }
}
