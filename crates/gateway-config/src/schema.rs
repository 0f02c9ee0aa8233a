//! Configuration schema definitions.
//!
//! This module defines all configuration types with validation and defaults.

use crate::loader::ConfigError;
use gateway_core::ALLOWED_METHODS;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use validator::Validate;

/// Name of the resilience policy used for services without their own entry
pub const DEFAULT_POLICY: &str = "default";

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server configuration
    #[validate(nested)]
    pub server: ServerConfig,

    /// Backend services reachable through the gateway
    #[validate(nested)]
    pub services: Vec<ServiceConfig>,

    /// Route access-control entries
    #[validate(nested)]
    pub acl: Vec<AclEntryConfig>,

    /// Resilience policies keyed by service name, `"default"` is mandatory
    pub resilience: HashMap<String, ResiliencePolicyConfig>,

    /// Response cache configuration
    #[validate(nested)]
    pub cache: CacheConfig,

    /// Outbound forwarding configuration
    #[validate(nested)]
    pub forwarding: ForwardingConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut resilience = HashMap::new();
        resilience.insert(DEFAULT_POLICY.to_string(), ResiliencePolicyConfig::default());
        Self {
            server: ServerConfig::default(),
            services: Vec::new(),
            acl: Vec::new(),
            resilience,
            cache: CacheConfig::default(),
            forwarding: ForwardingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Validate the configuration, including cross-field rules
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` describing the first violated rule
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Validation(format!("{e}")))?;

        if !self.resilience.contains_key(DEFAULT_POLICY) {
            return Err(ConfigError::Validation(format!(
                "resilience policy '{DEFAULT_POLICY}' is required"
            )));
        }
        for (name, policy) in &self.resilience {
            policy
                .validate()
                .map_err(|e| ConfigError::Validation(format!("resilience.{name}: {e}")))?;
            if policy.base_delay > policy.max_delay {
                return Err(ConfigError::Validation(format!(
                    "resilience.{name}: base_delay exceeds max_delay"
                )));
            }
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.to_lowercase()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate service '{}'",
                    service.name
                )));
            }
            let parsed = url::Url::parse(&service.base_address).map_err(|e| {
                ConfigError::Validation(format!(
                    "service '{}': invalid base_address: {e}",
                    service.name
                ))
            })?;
            if !parsed.has_host() {
                return Err(ConfigError::Validation(format!(
                    "service '{}': base_address must be an absolute URI",
                    service.name
                )));
            }
        }

        for entry in &self.acl {
            if !seen.contains(&entry.service.to_lowercase()) {
                return Err(ConfigError::Validation(format!(
                    "acl entry references unknown service '{}'",
                    entry.service
                )));
            }
            for method in &entry.methods {
                let known = ALLOWED_METHODS
                    .iter()
                    .any(|allowed| allowed.as_str().eq_ignore_ascii_case(method));
                if !known {
                    return Err(ConfigError::Validation(format!(
                        "acl entry for '{}' lists unsupported method '{method}'",
                        entry.service
                    )));
                }
            }
        }

        Ok(())
    }

    /// Get a service by name (case-insensitive)
    #[must_use]
    pub fn get_service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Policy for a service, falling back to `"default"`
    #[must_use]
    pub fn policy_for(&self, service: &str) -> Option<&ResiliencePolicyConfig> {
        self.resilience
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(service))
            .map(|(_, policy)| policy)
            .or_else(|| self.resilience.get(DEFAULT_POLICY))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    #[validate(length(min = 1))]
    pub host: String,

    /// Bind port
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub graceful_shutdown_timeout: Duration,

    /// Hard ceiling on inbound body size accepted by the HTTP layer
    pub max_request_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            graceful_shutdown_timeout: Duration::from_secs(30),
            max_request_body_size: 16 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Get the socket address
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Backend service route
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServiceConfig {
    /// Service name used in inbound paths
    #[validate(length(min = 1, max = 64))]
    pub name: String,

    /// Absolute base address, e.g. `http://users.internal:8080`
    #[validate(length(min = 1))]
    pub base_address: String,
}

/// Route access-control entry
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AclEntryConfig {
    /// Service the entry applies to
    #[validate(length(min = 1))]
    pub service: String,

    /// Permitted methods
    #[validate(length(min = 1))]
    pub methods: Vec<String>,

    /// Path prefix the request path must start with
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
}

fn default_path_prefix() -> String {
    "/".to_string()
}

/// Per-service resilience policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ResiliencePolicyConfig {
    /// Total attempt budget, the initial call included
    #[validate(range(min = 1, max = 10))]
    pub retry_count: u32,

    /// Base delay for exponential backoff
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound for a single backoff delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Budget for one backend attempt
    #[serde(with = "humantime_serde")]
    pub timeout_per_attempt: Duration,

    /// Budget for the whole operation, retries included
    #[serde(with = "humantime_serde")]
    pub overall_timeout: Duration,

    /// Consecutive failures before the circuit opens
    #[validate(range(min = 1, max = 1000))]
    pub circuit_breaker_threshold: u32,

    /// How long the circuit stays open before a probe is admitted
    #[serde(with = "humantime_serde")]
    pub circuit_breaker_open_duration: Duration,

    /// Add up to 10% random delay to each backoff
    pub use_jitter: bool,

    /// Response statuses that trigger a retry
    pub retryable_status_codes: Vec<u16>,
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}

impl Default for ResiliencePolicyConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            timeout_per_attempt: Duration::from_secs(10),
            overall_timeout: Duration::from_secs(30),
            circuit_breaker_threshold: 5,
            circuit_breaker_open_duration: Duration::from_secs(30),
            use_jitter: true,
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether GET responses are cached unless the caller opts out
    pub enabled: bool,

    /// Backing store
    pub backend: CacheBackend,

    /// TTL used when the request carries no override
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Maximum entries held by the in-memory store
    #[validate(range(min = 1))]
    pub max_entries: usize,

    /// Hex characters kept from the key digest
    #[validate(range(min = 8, max = 64))]
    pub key_length: usize,

    /// Namespace prepended to every storage key
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Memory,
            default_ttl: Duration::from_secs(300),
            max_entries: 10_000,
            key_length: 16,
            key_prefix: "gateway:cache:".to_string(),
        }
    }
}

/// Cache backing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local store
    #[default]
    Memory,
    /// Redis server
    Redis {
        /// Connection URL, e.g. `redis://127.0.0.1:6379`
        url: String,
    },
}

/// Outbound forwarding configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Largest encoded body forwarded to a backend
    #[validate(range(min = 1))]
    pub max_body_bytes: usize,

    /// Header carrying the correlation id
    #[validate(length(min = 1))]
    pub correlation_header: String,

    /// Characters of an upstream error body kept in error details
    pub error_excerpt_chars: usize,

    /// Connect timeout of the HTTP client
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Idle connections kept per backend host
    pub pool_max_idle_per_host: usize,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
            correlation_header: "x-correlation-id".to_string(),
            error_excerpt_chars: 512,
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 32,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Metrics configuration
    #[validate(nested)]
    pub metrics: MetricsConfig,

    /// Logging configuration
    #[validate(nested)]
    pub logging: LoggingConfig,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    pub enabled: bool,

    /// Metrics endpoint path
    pub endpoint: String,

    /// Histogram buckets for latency
    #[serde(default = "default_latency_buckets")]
    pub latency_buckets: Vec<f64>,
}

fn default_latency_buckets() -> Vec<f64> {
    vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "/metrics".to_string(),
            latency_buckets: default_latency_buckets(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: LogFormat,

    /// Include span open/close events
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            span_events: false,
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs
    #[default]
    Json,
    /// Human-readable pretty logs
    Pretty,
    /// Compact single-line logs
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.services.push(ServiceConfig {
            name: "users".to_string(),
            base_address: "http://users.internal:8080".to_string(),
        });
        config.acl.push(AclEntryConfig {
            service: "users".to_string(),
            methods: vec!["GET".to_string(), "post".to_string()],
            path_prefix: "/api/users".to_string(),
        });
        config
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.port, 8080);
        assert!(config.resilience.contains_key(DEFAULT_POLICY));
        assert!(config.validate_config().is_ok());
    }

    #[test]
    fn test_sample_config_is_valid() {
        assert!(sample().validate_config().is_ok());
    }

    #[test]
    fn test_missing_default_policy_rejected() {
        let mut config = sample();
        config.resilience.clear();
        config
            .resilience
            .insert("users".to_string(), ResiliencePolicyConfig::default());
        let err = config.validate_config().unwrap_err();
        assert!(err.to_string().contains("default"));
    }

    #[test]
    fn test_acl_for_unknown_service_rejected() {
        let mut config = sample();
        config.acl.push(AclEntryConfig {
            service: "billing".to_string(),
            methods: vec!["GET".to_string()],
            path_prefix: "/".to_string(),
        });
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_unsupported_acl_method_rejected() {
        let mut config = sample();
        config.acl[0].methods.push("TRACE".to_string());
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_relative_base_address_rejected() {
        let mut config = sample();
        config.services[0].base_address = "/users".to_string();
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_zero_attempt_budget_rejected() {
        let mut config = sample();
        if let Some(policy) = config.resilience.get_mut(DEFAULT_POLICY) {
            policy.retry_count = 0;
        }
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_policy_fallback() {
        let mut config = sample();
        let custom = ResiliencePolicyConfig {
            retry_count: 1,
            ..ResiliencePolicyConfig::default()
        };
        config.resilience.insert("Users".to_string(), custom.clone());

        assert_eq!(config.policy_for("users"), Some(&custom));
        assert_eq!(
            config.policy_for("orders"),
            config.resilience.get(DEFAULT_POLICY)
        );
    }

    #[test]
    fn test_yaml_policy_durations() {
        let yaml = r#"
retry_count: 4
base_delay: 250ms
max_delay: 2s
circuit_breaker_open_duration: 1m
"#;
        let policy: ResiliencePolicyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.retry_count, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(2));
        assert_eq!(policy.circuit_breaker_open_duration, Duration::from_secs(60));
        assert_eq!(policy.retryable_status_codes, vec![408, 429, 500, 502, 503, 504]);
    }

    #[test]
    fn test_cache_backend_tagging() {
        let yaml = "type: redis\nurl: redis://cache:6379\n";
        let backend: CacheBackend = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            backend,
            CacheBackend::Redis {
                url: "redis://cache:6379".to_string()
            }
        );
    }
}
