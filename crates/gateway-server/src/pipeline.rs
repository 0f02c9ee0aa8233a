//! The forwarding pipeline.
//!
//! One call to [`ForwardingPipeline::process`] takes an already-authenticated request
//! envelope through authorization, the response cache and the resilience policy of
//! its service, and always comes back with a [`TranslateResult`]. Nothing escapes as an
//! error or a panic.

use futures::FutureExt;
use gateway_core::{
    BackendClient, BackendResponse, GatewayError, GatewayResult, ProxyError, ProxyResponse,
    RequestEnvelope, TranslateResult,
};
use gateway_proxy::RequestTransformer;
use gateway_resilience::{ResiliencePolicyEngine, ResponseCache};
use gateway_routing::RouteTable;
use gateway_telemetry::{MetricsSink, NoopMetrics, RequestRecord};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Default number of upstream body characters kept in error details
const DEFAULT_ERROR_EXCERPT_CHARS: usize = 512;

/// Authorizes, caches and forwards requests to backend services
pub struct ForwardingPipeline {
    routes: Arc<RouteTable>,
    engine: Arc<ResiliencePolicyEngine>,
    cache: Arc<ResponseCache>,
    transformer: RequestTransformer,
    backend: Arc<dyn BackendClient>,
    metrics: Arc<dyn MetricsSink>,
    error_excerpt_chars: usize,
}

impl std::fmt::Debug for ForwardingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardingPipeline")
            .field("engine", &self.engine)
            .field("cache", &self.cache)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl ForwardingPipeline {
    /// Create a pipeline
    #[must_use]
    pub fn new(
        routes: Arc<RouteTable>,
        engine: Arc<ResiliencePolicyEngine>,
        cache: Arc<ResponseCache>,
        transformer: RequestTransformer,
        backend: Arc<dyn BackendClient>,
    ) -> Self {
        Self {
            routes,
            engine,
            cache,
            transformer,
            backend,
            metrics: Arc::new(NoopMetrics),
            error_excerpt_chars: DEFAULT_ERROR_EXCERPT_CHARS,
        }
    }

    /// Attach a metrics sink
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set how much of an upstream error body is kept
    #[must_use]
    pub fn with_error_excerpt_chars(mut self, chars: usize) -> Self {
        self.error_excerpt_chars = chars;
        self
    }

    /// Route table in use
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Resilience engine in use
    #[must_use]
    pub fn engine(&self) -> &ResiliencePolicyEngine {
        &self.engine
    }

    /// Response cache in use
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Forward one request
    pub async fn process(&self, envelope: RequestEnvelope) -> TranslateResult {
        let started = Instant::now();
        let correlation_id = self.transformer.correlation_id(&envelope);
        let span = info_span!(
            "forward",
            service = %envelope.service,
            method = %envelope.method,
            path = %envelope.path,
            correlation_id = %correlation_id,
        );

        let outcome = AssertUnwindSafe(self.forward(&envelope, &correlation_id, started))
            .catch_unwind()
            .instrument(span)
            .await;

        let result = match outcome {
            Ok(Ok(response)) => TranslateResult::Response(response),
            Ok(Err(err)) => {
                if err.is_authorization_failure() {
                    info!(
                        service = %envelope.service,
                        correlation_id = %correlation_id,
                        reason = err.error_code(),
                        "Request rejected"
                    );
                } else {
                    warn!(
                        service = %envelope.service,
                        correlation_id = %correlation_id,
                        error = %err,
                        "Request failed"
                    );
                }
                TranslateResult::Error(ProxyError::from_gateway_error(&err, correlation_id.as_str()))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    service = %envelope.service,
                    correlation_id = %correlation_id,
                    panic = %message,
                    "Pipeline panicked"
                );
                let err = GatewayError::internal(format!("pipeline panicked: {message}"));
                TranslateResult::Error(ProxyError::from_gateway_error(&err, correlation_id.as_str()))
            }
        };

        self.metrics.record_request(&RequestRecord {
            service: envelope.service.clone(),
            method: envelope.method.to_string(),
            status: result.status_code(),
            latency: started.elapsed(),
            from_cache: result.from_cache(),
        });

        result
    }

    async fn forward(
        &self,
        envelope: &RequestEnvelope,
        correlation_id: &str,
        started: Instant,
    ) -> GatewayResult<ProxyResponse> {
        let route = self.routes.authorize(envelope)?.clone();

        let cache_key = self
            .cache
            .applies_to(envelope)
            .then(|| self.cache.key_for(envelope));

        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache.lookup(key).await {
                debug!(key = %key, "Serving from cache");
                return Ok(proxy_response(
                    &route.service,
                    cached.into_backend(),
                    true,
                    correlation_id,
                    started,
                ));
            }
        }

        let outbound = self.transformer.transform(envelope, &route, correlation_id)?;
        let backend = Arc::clone(&self.backend);
        let response = self
            .engine
            .execute(&route.service, move || {
                let backend = Arc::clone(&backend);
                let request = outbound.clone();
                async move { backend.send(request).await }
            })
            .await?;

        if !response.is_success() {
            let excerpt = response.body_excerpt(self.error_excerpt_chars);
            return Err(GatewayError::BackendBadResponse {
                service: route.service.clone(),
                status: response.status,
                body_excerpt: (!excerpt.is_empty()).then_some(excerpt),
            });
        }

        if let Some(key) = cache_key {
            let cache = Arc::clone(&self.cache);
            let ttl = self.cache.ttl_for(envelope);
            let stored = response.clone();
            tokio::spawn(
                async move {
                    cache.store(&key, &stored, ttl).await;
                }
                .in_current_span(),
            );
        }

        Ok(proxy_response(&route.service, response, false, correlation_id, started))
    }

    /// Drop every cached response of a service, returning how many were removed
    pub async fn invalidate_cache_for_service(&self, service: &str) -> usize {
        let removed = self.cache.invalidate_service(service).await;
        info!(service, removed, "Cache invalidated for service");
        removed
    }

    /// Drop one cached response by its storage key
    pub async fn invalidate_cache_key(&self, key: &str) -> bool {
        let existed = self.cache.invalidate_key(key).await;
        info!(key, existed, "Cache key invalidated");
        existed
    }
}

fn proxy_response(
    service: &str,
    response: BackendResponse,
    from_cache: bool,
    correlation_id: &str,
    started: Instant,
) -> ProxyResponse {
    ProxyResponse {
        status_code: response.status,
        headers: response.headers,
        body: response.body,
        processing_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        from_cache,
        processed_by_service: service.to_string(),
        correlation_id: correlation_id.to_string(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
