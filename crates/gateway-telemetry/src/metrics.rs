//! Metrics for the forwarding pipeline.
//!
//! Components report through the [`MetricsSink`] trait. [`PrometheusMetrics`] backs it
//! with Prometheus collectors, [`NoopMetrics`] discards everything.
//!
//! Provides metrics for:
//! - Request counts and latencies per service, method and status
//! - Cache hits, misses, stores and errors
//! - Retries and circuit breaker state

use gateway_config::MetricsConfig;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;
use tracing::{debug, error, info};

/// One finished request, successful or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Target service
    pub service: String,
    /// HTTP method
    pub method: String,
    /// Final status code
    pub status: u16,
    /// Time spent in the pipeline
    pub latency: Duration,
    /// Whether the response came from cache
    pub from_cache: bool,
}

/// Result of a cache interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Live entry found
    Hit,
    /// Nothing usable found
    Miss,
    /// Response written
    Store,
    /// Store failed and was ignored
    Error,
}

impl CacheOutcome {
    /// Label value
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Store => "store",
            Self::Error => "error",
        }
    }
}

/// Receives pipeline measurements
///
/// Implementations must be cheap and non-blocking; they are called on the request path.
pub trait MetricsSink: Send + Sync + 'static {
    /// Record a finished request
    fn record_request(&self, record: &RequestRecord);

    /// Record a cache interaction
    fn record_cache_operation(&self, _service: &str, _outcome: CacheOutcome) {}

    /// Record that attempt `attempt` failed and a retry follows
    fn record_retry(&self, _service: &str, _attempt: u32) {}

    /// Record a call rejected by an open circuit
    fn record_circuit_rejection(&self, _service: &str) {}

    /// Record the current breaker state (0 closed, 1 open, 2 half-open)
    fn record_circuit_state(&self, _service: &str, _state: i64) {}
}

/// Sink that drops every measurement
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_request(&self, _record: &RequestRecord) {}
}

/// Prometheus-backed sink
pub struct PrometheusMetrics {
    registry: Registry,
    requests_total: CounterVec,
    request_latency: HistogramVec,
    cache_operations: CounterVec,
    retries_total: CounterVec,
    circuit_rejections: CounterVec,
    circuit_breaker_state: IntGaugeVec,
    last_status: GaugeVec,
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

impl PrometheusMetrics {
    /// Create and register all collectors
    ///
    /// # Errors
    /// Returns error if metrics cannot be registered
    pub fn new(config: &MetricsConfig) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("requests_total", "Total number of proxied requests").namespace("gateway"),
            &["service", "method", "status", "cache"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_latency = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Pipeline latency in seconds")
                .namespace("gateway")
                .buckets(config.latency_buckets.clone()),
            &["service", "method", "cache"],
        )?;
        registry.register(Box::new(request_latency.clone()))?;

        let cache_operations = CounterVec::new(
            Opts::new("cache_operations_total", "Cache operations by outcome").namespace("gateway"),
            &["service", "result"],
        )?;
        registry.register(Box::new(cache_operations.clone()))?;

        let retries_total = CounterVec::new(
            Opts::new("retries_total", "Backend call retries").namespace("gateway"),
            &["service"],
        )?;
        registry.register(Box::new(retries_total.clone()))?;

        let circuit_rejections = CounterVec::new(
            Opts::new(
                "circuit_rejections_total",
                "Calls rejected by an open circuit breaker",
            )
            .namespace("gateway"),
            &["service"],
        )?;
        registry.register(Box::new(circuit_rejections.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            )
            .namespace("gateway"),
            &["service"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let last_status = GaugeVec::new(
            Opts::new("last_status_code", "Status code of the latest response").namespace("gateway"),
            &["service"],
        )?;
        registry.register(Box::new(last_status.clone()))?;

        info!("Metrics initialized");

        Ok(Self {
            registry,
            requests_total,
            request_latency,
            cache_operations,
            retries_total,
            circuit_rejections,
            circuit_breaker_state,
            last_status,
        })
    }

    /// Get metrics as Prometheus text format
    #[must_use]
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Get the Prometheus registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn cache_label(from_cache: bool) -> &'static str {
    if from_cache {
        "hit"
    } else {
        "miss"
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_request(&self, record: &RequestRecord) {
        let status = record.status.to_string();
        let cache = cache_label(record.from_cache);

        self.requests_total
            .with_label_values(&[&record.service, &record.method, &status, cache])
            .inc();
        self.request_latency
            .with_label_values(&[&record.service, &record.method, cache])
            .observe(record.latency.as_secs_f64());
        self.last_status
            .with_label_values(&[&record.service])
            .set(f64::from(record.status));

        debug!(
            service = %record.service,
            method = %record.method,
            status = record.status,
            latency_ms = u64::try_from(record.latency.as_millis()).unwrap_or(u64::MAX),
            from_cache = record.from_cache,
            "Request metrics recorded"
        );
    }

    fn record_cache_operation(&self, service: &str, outcome: CacheOutcome) {
        self.cache_operations
            .with_label_values(&[service, outcome.as_str()])
            .inc();
    }

    fn record_retry(&self, service: &str, _attempt: u32) {
        self.retries_total.with_label_values(&[service]).inc();
    }

    fn record_circuit_rejection(&self, service: &str) {
        self.circuit_rejections.with_label_values(&[service]).inc();
    }

    fn record_circuit_state(&self, service: &str, state: i64) {
        self.circuit_breaker_state
            .with_label_values(&[service])
            .set(state);
    }
}
