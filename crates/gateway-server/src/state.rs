//! Gateway context shared across handlers.

use crate::pipeline::ForwardingPipeline;
use gateway_config::{CacheBackend, CacheConfig, GatewayConfig};
use gateway_core::{BackendClient, GatewayError};
use gateway_proxy::{HttpBackendClient, RequestTransformer};
use gateway_resilience::{
    CacheStore, InMemoryCacheStore, RedisCacheStore, ResiliencePolicyEngine, ResponseCache,
};
use gateway_routing::RouteTable;
use gateway_telemetry::{MetricsSink, NoopMetrics, PrometheusMetrics};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Everything a request needs, built once at startup
#[derive(Clone)]
pub struct GatewayContext {
    config: Arc<GatewayConfig>,
    pipeline: Arc<ForwardingPipeline>,
    metrics: Option<Arc<PrometheusMetrics>>,
    started_at: Instant,
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayContext")
            .field("pipeline", &self.pipeline)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl GatewayContext {
    /// Create a context builder
    #[must_use]
    pub fn builder(config: GatewayConfig) -> GatewayContextBuilder {
        GatewayContextBuilder::new(config)
    }

    /// Build a production context: HTTP backend client, configured cache store and
    /// Prometheus metrics when enabled
    ///
    /// # Errors
    /// Returns a configuration error if the configuration is invalid, the cache store
    /// cannot be reached or a component fails to initialize
    pub async fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        let store = connect_store(&config.cache).await?;
        Self::builder(config).cache_store(store).build()
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The forwarding pipeline
    #[must_use]
    pub fn pipeline(&self) -> &ForwardingPipeline {
        &self.pipeline
    }

    /// Prometheus metrics, if enabled
    #[must_use]
    pub fn metrics(&self) -> Option<&PrometheusMetrics> {
        self.metrics.as_deref()
    }

    /// Seconds since the context was built
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Builder for [`GatewayContext`]
///
/// Components that are not supplied are created from the configuration.
pub struct GatewayContextBuilder {
    config: GatewayConfig,
    backend: Option<Arc<dyn BackendClient>>,
    store: Option<Arc<dyn CacheStore>>,
    metrics: Option<Arc<PrometheusMetrics>>,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl GatewayContextBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            backend: None,
            store: None,
            metrics: None,
            sink: None,
        }
    }

    /// Set the backend client
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn BackendClient>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the cache store
    #[must_use]
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the Prometheus metrics
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<PrometheusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Send measurements to a custom sink instead of Prometheus
    #[must_use]
    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the context
    ///
    /// # Errors
    /// Returns a configuration error if the configuration is invalid or a component
    /// fails to initialize
    pub fn build(self) -> Result<GatewayContext, GatewayError> {
        let config = self.config;
        config
            .validate_config()
            .map_err(|e| GatewayError::configuration(e.to_string()))?;

        let metrics = match self.metrics {
            Some(metrics) => Some(metrics),
            None if self.sink.is_none() && config.observability.metrics.enabled => Some(Arc::new(
                PrometheusMetrics::new(&config.observability.metrics).map_err(|e| {
                    GatewayError::configuration(format!("failed to register metrics: {e}"))
                })?,
            )),
            None => None,
        };
        let sink: Arc<dyn MetricsSink> = match (&self.sink, &metrics) {
            (Some(sink), _) => Arc::clone(sink),
            (None, Some(metrics)) => Arc::clone(metrics) as Arc<dyn MetricsSink>,
            (None, None) => Arc::new(NoopMetrics),
        };

        let routes = RouteTable::from_config(&config)?;
        let engine = ResiliencePolicyEngine::from_config(&config)?.with_metrics(Arc::clone(&sink));

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryCacheStore::new(config.cache.max_entries)));
        let cache = ResponseCache::from_config(
            &config.cache,
            store,
            &config.forwarding.correlation_header,
        )
        .with_metrics(Arc::clone(&sink));

        let backend: Arc<dyn BackendClient> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackendClient::new(&config.forwarding)?),
        };

        let pipeline = ForwardingPipeline::new(
            Arc::new(routes),
            Arc::new(engine),
            Arc::new(cache),
            RequestTransformer::from_config(&config.forwarding),
            backend,
        )
        .with_metrics(sink)
        .with_error_excerpt_chars(config.forwarding.error_excerpt_chars);

        info!(
            services = config.services.len(),
            acl_entries = config.acl.len(),
            cache_enabled = config.cache.enabled,
            metrics_enabled = metrics.is_some(),
            "Gateway context initialized"
        );

        Ok(GatewayContext {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            metrics,
            started_at: Instant::now(),
        })
    }
}

/// Open the configured cache store
///
/// # Errors
/// Returns a configuration error if Redis is configured but unreachable
pub async fn connect_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>, GatewayError> {
    match &config.backend {
        CacheBackend::Memory => Ok(Arc::new(InMemoryCacheStore::new(config.max_entries))),
        CacheBackend::Redis { url } => {
            let store = RedisCacheStore::connect(url).await.map_err(|e| {
                GatewayError::configuration(format!("cache store unavailable: {e}"))
            })?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_config::{AclEntryConfig, ServiceConfig};
    use gateway_core::{BackendResponse, OutboundRequest};

    struct StaticBackend;

    #[async_trait]
    impl BackendClient for StaticBackend {
        async fn send(&self, _request: OutboundRequest) -> Result<BackendResponse, GatewayError> {
            Ok(BackendResponse::new(200, "ok"))
        }
    }

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.services.push(ServiceConfig {
            name: "users".to_string(),
            base_address: "http://users.internal".to_string(),
        });
        config.acl.push(AclEntryConfig {
            service: "users".to_string(),
            methods: vec!["GET".to_string()],
            path_prefix: "/".to_string(),
        });
        config
    }

    #[test]
    fn test_builder_defaults() {
        let context = GatewayContext::builder(config())
            .backend(Arc::new(StaticBackend))
            .build()
            .unwrap();

        assert!(context.metrics().is_some());
        assert_eq!(context.pipeline().engine().breakers().len(), 1);
        assert!(context.pipeline().routes().resolve("USERS").is_some());
    }

    #[test]
    fn test_custom_sink_disables_prometheus() {
        let context = GatewayContext::builder(config())
            .backend(Arc::new(StaticBackend))
            .metrics_sink(Arc::new(NoopMetrics))
            .build()
            .unwrap();
        assert!(context.metrics().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.acl.push(AclEntryConfig {
            service: "unknown".to_string(),
            methods: vec!["GET".to_string()],
            path_prefix: "/".to_string(),
        });
        let err = GatewayContext::builder(config)
            .backend(Arc::new(StaticBackend))
            .build()
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_memory_store_selected() {
        let store = connect_store(&CacheConfig::default()).await.unwrap();
        assert_eq!(store.name(), "memory");
    }
}
