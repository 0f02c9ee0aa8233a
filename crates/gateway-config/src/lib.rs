//! # Gateway Configuration
//!
//! Configuration management for the API gateway, including:
//! - Service routes, ACL entries and per-service resilience policies
//! - Cache, forwarding and observability settings
//! - Loading from YAML/TOML/JSON with environment variable substitution

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod loader;
pub mod schema;

pub use loader::{load_config, substitute_env_vars, ConfigError, ConfigLoader, ConfigSource};
pub use schema::{
    AclEntryConfig, CacheBackend, CacheConfig, ForwardingConfig, GatewayConfig, LogFormat,
    LoggingConfig, MetricsConfig, ObservabilityConfig, ResiliencePolicyConfig, ServerConfig,
    ServiceConfig, DEFAULT_POLICY,
};
