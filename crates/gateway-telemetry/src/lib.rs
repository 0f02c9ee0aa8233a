//! # Gateway Telemetry
//!
//! Observability for the API gateway:
//! - Structured logging through `tracing`
//! - Prometheus metrics behind the [`MetricsSink`] trait

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LoggingError};
pub use metrics::{CacheOutcome, MetricsSink, NoopMetrics, PrometheusMetrics, RequestRecord};
