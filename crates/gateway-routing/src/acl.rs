//! Access-control entries for proxied routes.

use gateway_config::AclEntryConfig;
use gateway_core::GatewayError;
use http::Method;
use serde::Serialize;
use std::collections::HashSet;

/// One allow rule: a service, the methods it accepts and a path prefix
#[derive(Debug, Clone, Serialize)]
pub struct AclEntry {
    /// Service name as configured
    pub service: String,
    /// Permitted methods
    #[serde(serialize_with = "serialize_methods")]
    pub methods: HashSet<Method>,
    /// Path prefix, compared case-insensitively
    pub path_prefix: String,
}

fn serialize_methods<S: serde::Serializer>(
    methods: &HashSet<Method>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut names: Vec<&str> = methods.iter().map(Method::as_str).collect();
    names.sort_unstable();
    serializer.collect_seq(names)
}

impl AclEntry {
    /// Create an entry with no methods
    #[must_use]
    pub fn new(service: impl Into<String>, path_prefix: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            methods: HashSet::new(),
            path_prefix: path_prefix.into(),
        }
    }

    /// Allow a method
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.insert(method);
        self
    }

    /// Build from configuration
    ///
    /// # Errors
    /// Returns a configuration error for method names that are not valid HTTP methods
    pub fn from_config(config: &AclEntryConfig) -> Result<Self, GatewayError> {
        let methods = config
            .methods
            .iter()
            .map(|name| {
                Method::from_bytes(name.to_ascii_uppercase().as_bytes()).map_err(|_| {
                    GatewayError::configuration(format!(
                        "invalid method '{name}' in acl entry for '{}'",
                        config.service
                    ))
                })
            })
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(Self {
            service: config.service.clone(),
            methods,
            path_prefix: config.path_prefix.clone(),
        })
    }

    /// Whether the entry admits the request
    #[must_use]
    pub fn matches(&self, service: &str, method: &Method, path: &str) -> bool {
        self.service.eq_ignore_ascii_case(service)
            && self.methods.contains(method)
            && starts_with_ignore_case(path, &self.path_prefix)
    }
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> AclEntry {
        AclEntry::new("Users", "/api/users")
            .with_method(Method::GET)
            .with_method(Method::POST)
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let entry = entry();
        assert!(entry.matches("users", &Method::GET, "/api/users/42"));
        assert!(entry.matches("USERS", &Method::POST, "/API/Users"));
    }

    #[test]
    fn test_method_and_prefix_must_match() {
        let entry = entry();
        assert!(!entry.matches("users", &Method::DELETE, "/api/users/42"));
        assert!(!entry.matches("users", &Method::GET, "/api/orders"));
        assert!(!entry.matches("users", &Method::GET, "/api"));
        assert!(!entry.matches("orders", &Method::GET, "/api/users"));
    }

    #[test]
    fn test_non_ascii_path_does_not_panic() {
        let entry = AclEntry::new("users", "/é").with_method(Method::GET);
        assert!(entry.matches("users", &Method::GET, "/é/x"));
        assert!(!entry.matches("users", &Method::GET, "/"));
    }

    #[test]
    fn test_from_config() {
        let config = AclEntryConfig {
            service: "orders".to_string(),
            methods: vec!["get".to_string(), "DELETE".to_string()],
            path_prefix: "/".to_string(),
        };
        let entry = AclEntry::from_config(&config).unwrap();
        assert!(entry.methods.contains(&Method::GET));
        assert!(entry.methods.contains(&Method::DELETE));
        assert_eq!(entry.methods.len(), 2);
    }
}
