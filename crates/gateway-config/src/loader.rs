//! Configuration loading from files and environment.
//!
//! Sources are applied in order, later sources overriding earlier ones. File contents
//! go through `${VAR}` / `${VAR:-default}` substitution before parsing, and
//! `{PREFIX}_*` environment variables are applied last.

use crate::schema::{CacheBackend, GatewayConfig};
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Environment prefix used by [`load_config`]
pub const ENV_PREFIX: &str = "GATEWAY";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// The path to the file that was not found
        path: String,
    },

    /// IO error
    #[error("IO error reading configuration: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Configuration validation error: {0}")]
    Validation(String),

    /// Unsupported format
    #[error("Unsupported configuration format: {extension}")]
    UnsupportedFormat {
        /// The file extension that was not supported
        extension: String,
    },

    /// Environment override could not be parsed
    #[error("Invalid value for {name}: {value}")]
    InvalidOverride {
        /// Variable name
        name: String,
        /// Offending value
        value: String,
    },
}

/// Configuration source
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path, format chosen by extension
    File(String),
    /// Raw YAML string
    Yaml(String),
    /// Raw TOML string
    Toml(String),
    /// Raw JSON string
    Json(String),
    /// Default configuration
    Default,
}

/// Configuration loader
#[derive(Debug, Default)]
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new config loader
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration source
    #[must_use]
    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Add a file source
    #[must_use]
    pub fn with_file(self, path: impl Into<String>) -> Self {
        self.with_source(ConfigSource::File(path.into()))
    }

    /// Set environment variable prefix for overrides
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Load configuration from all sources
    ///
    /// # Errors
    /// Returns error if any source fails to load or the result fails validation
    pub async fn load(self) -> Result<GatewayConfig, ConfigError> {
        let mut config = GatewayConfig::default();

        for source in &self.sources {
            let overlay = Self::load_source(source).await?;
            config = Self::merge_configs(config, overlay);
        }

        if let Some(prefix) = &self.env_prefix {
            Self::apply_env_overrides(&mut config, prefix)?;
        }

        config.validate_config()?;

        info!(
            services = config.services.len(),
            acl_entries = config.acl.len(),
            policies = config.resilience.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    async fn load_source(source: &ConfigSource) -> Result<GatewayConfig, ConfigError> {
        match source {
            ConfigSource::File(path) => Self::load_file(path).await,
            ConfigSource::Yaml(content) => Ok(serde_yaml::from_str(&substitute_env_vars(content))?),
            ConfigSource::Toml(content) => Ok(toml::from_str(&substitute_env_vars(content))?),
            ConfigSource::Json(content) => Ok(serde_json::from_str(&substitute_env_vars(content))?),
            ConfigSource::Default => Ok(GatewayConfig::default()),
        }
    }

    async fn load_file(path: &str) -> Result<GatewayConfig, ConfigError> {
        let path = Path::new(path);

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let content = substitute_env_vars(&fs::read_to_string(path).await?);

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        debug!(path = %path.display(), format = %extension, "Loading configuration file");

        match extension.as_str() {
            "yaml" | "yml" => Ok(serde_yaml::from_str(&content)?),
            "toml" => Ok(toml::from_str(&content)?),
            "json" => Ok(serde_json::from_str(&content)?),
            ext => Err(ConfigError::UnsupportedFormat {
                extension: ext.to_string(),
            }),
        }
    }

    /// Overlay wins for scalar sections; route lists are replaced when the overlay
    /// defines any, policies are merged by name.
    fn merge_configs(base: GatewayConfig, overlay: GatewayConfig) -> GatewayConfig {
        let mut resilience = base.resilience;
        resilience.extend(overlay.resilience);

        GatewayConfig {
            server: overlay.server,
            services: if overlay.services.is_empty() {
                base.services
            } else {
                overlay.services
            },
            acl: if overlay.acl.is_empty() {
                base.acl
            } else {
                overlay.acl
            },
            resilience,
            cache: overlay.cache,
            forwarding: overlay.forwarding,
            observability: overlay.observability,
        }
    }

    fn apply_env_overrides(config: &mut GatewayConfig, prefix: &str) -> Result<(), ConfigError> {
        if let Some(port) = env_var(prefix, "SERVER_PORT") {
            config.server.port = parse_override(prefix, "SERVER_PORT", &port)?;
        }
        if let Some(host) = env_var(prefix, "SERVER_HOST") {
            config.server.host = host;
        }
        if let Some(level) = env_var(prefix, "LOG_LEVEL") {
            config.observability.logging.level = level;
        }
        if let Some(enabled) = env_var(prefix, "METRICS_ENABLED") {
            config.observability.metrics.enabled =
                parse_override(prefix, "METRICS_ENABLED", &enabled)?;
        }
        if let Some(enabled) = env_var(prefix, "CACHE_ENABLED") {
            config.cache.enabled = parse_override(prefix, "CACHE_ENABLED", &enabled)?;
        }
        if let Some(url) = env_var(prefix, "REDIS_URL") {
            config.cache.backend = CacheBackend::Redis { url };
        }
        Ok(())
    }
}

fn env_var(prefix: &str, suffix: &str) -> Option<String> {
    std::env::var(format!("{prefix}_{suffix}")).ok()
}

fn parse_override<T: std::str::FromStr>(
    prefix: &str,
    suffix: &str,
    value: &str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidOverride {
        name: format!("{prefix}_{suffix}"),
        value: value.to_string(),
    })
}

#[allow(clippy::expect_used)]
fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("valid regex"))
}

/// Substitute `${VAR}` and `${VAR:-default}` references.
///
/// Unset variables without a default are left in place and logged, since they
/// may sit in sections the deployment never uses.
pub fn substitute_env_vars(content: &str) -> String {
    env_pattern()
        .replace_all(content, |caps: &Captures<'_>| {
            let name = &caps[1];
            match (std::env::var(name), caps.get(2)) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.as_str().to_string(),
                (Err(_), None) => {
                    warn!(variable = name, "Environment variable not set");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Load configuration from default locations
///
/// Looks for configuration in order:
/// 1. Path from the `GATEWAY_CONFIG` environment variable
/// 2. ./gateway.yaml, ./gateway.yml, ./gateway.toml
/// 3. ./config/gateway.yaml
///
/// # Errors
/// Returns error if the configuration found fails to parse or validate
pub async fn load_config() -> Result<GatewayConfig, ConfigError> {
    let explicit = std::env::var(format!("{ENV_PREFIX}_CONFIG")).ok();

    let search_paths: Vec<&str> = match explicit.as_deref() {
        Some(path) => vec![path],
        None => vec![
            "gateway.yaml",
            "gateway.yml",
            "gateway.toml",
            "config/gateway.yaml",
        ],
    };

    for path in search_paths {
        if explicit.is_some() || Path::new(path).exists() {
            info!(path, "Loading configuration");
            return ConfigLoader::new()
                .with_file(path)
                .with_env_prefix(ENV_PREFIX)
                .load()
                .await;
        }
    }

    warn!("No configuration file found, using defaults");
    ConfigLoader::new()
        .with_source(ConfigSource::Default)
        .with_env_prefix(ENV_PREFIX)
        .load()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DEFAULT_POLICY;
    use std::time::Duration;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("GW_TEST_UPSTREAM", "http://users:9000");

        let result = substitute_env_vars("base_address: ${GW_TEST_UPSTREAM}");
        assert_eq!(result, "base_address: http://users:9000");

        std::env::remove_var("GW_TEST_UPSTREAM");
    }

    #[test]
    fn test_env_var_with_default() {
        let result = substitute_env_vars("url: ${GW_TEST_NONEXISTENT:-redis://localhost}");
        assert_eq!(result, "url: redis://localhost");
    }

    #[test]
    fn test_missing_env_var_left_in_place() {
        let result = substitute_env_vars("key: ${GW_TEST_ALSO_MISSING}");
        assert_eq!(result, "key: ${GW_TEST_ALSO_MISSING}");
    }

    #[tokio::test]
    async fn test_load_yaml_content() {
        let yaml = r#"
server:
  port: 9090
  host: "127.0.0.1"
services:
  - name: users
    base_address: http://users.internal:8080
acl:
  - service: users
    methods: [GET, POST]
    path_prefix: /api/users
resilience:
  default:
    retry_count: 2
  users:
    timeout_per_attempt: 500ms
cache:
  default_ttl: 10m
"#;

        let config = ConfigLoader::new()
            .with_source(ConfigSource::Yaml(yaml.to_string()))
            .load()
            .await
            .expect("load config");

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.acl[0].path_prefix, "/api/users");
        assert_eq!(config.resilience[DEFAULT_POLICY].retry_count, 2);
        assert_eq!(
            config.resilience["users"].timeout_per_attempt,
            Duration::from_millis(500)
        );
        assert_eq!(config.cache.default_ttl, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_load_toml_content() {
        let toml = r#"
[[services]]
name = "orders"
base_address = "https://orders.internal"

[[acl]]
service = "orders"
methods = ["GET"]
"#;

        let config = ConfigLoader::new()
            .with_source(ConfigSource::Toml(toml.to_string()))
            .load()
            .await
            .expect("load config");

        assert_eq!(config.services[0].name, "orders");
        assert_eq!(config.acl[0].path_prefix, "/");
    }

    #[tokio::test]
    async fn test_load_default_config() {
        let config = ConfigLoader::new()
            .with_source(ConfigSource::Default)
            .load()
            .await
            .expect("load config");

        assert_eq!(config.server.port, 8080);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let yaml = r#"
acl:
  - service: ghost
    methods: [GET]
"#;
        let result = ConfigLoader::new()
            .with_source(ConfigSource::Yaml(yaml.to_string()))
            .load()
            .await;
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/gateway.yaml")
            .load()
            .await;
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_env_overrides() {
        std::env::set_var("GW_TEST_PREFIX_SERVER_PORT", "3000");
        std::env::set_var("GW_TEST_PREFIX_REDIS_URL", "redis://cache:6379");

        let config = ConfigLoader::new()
            .with_source(ConfigSource::Default)
            .with_env_prefix("GW_TEST_PREFIX")
            .load()
            .await
            .expect("load config");

        assert_eq!(config.server.port, 3000);
        assert_eq!(
            config.cache.backend,
            CacheBackend::Redis {
                url: "redis://cache:6379".to_string()
            }
        );

        std::env::remove_var("GW_TEST_PREFIX_SERVER_PORT");
        std::env::remove_var("GW_TEST_PREFIX_REDIS_URL");
    }

    #[tokio::test]
    async fn test_bad_env_override() {
        std::env::set_var("GW_BAD_PREFIX_SERVER_PORT", "not-a-port");

        let result = ConfigLoader::new()
            .with_source(ConfigSource::Default)
            .with_env_prefix("GW_BAD_PREFIX")
            .load()
            .await;
        assert!(matches!(result, Err(ConfigError::InvalidOverride { .. })));

        std::env::remove_var("GW_BAD_PREFIX_SERVER_PORT");
    }
}
