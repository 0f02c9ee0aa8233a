//! Static route table and request authorization.
//!
//! Built once from configuration and shared read-only. Authorization runs before any
//! cache lookup or network I/O.

use crate::{acl::AclEntry, path::normalize_path};
use gateway_config::GatewayConfig;
use gateway_core::{GatewayError, GatewayResult, RequestEnvelope, ALLOWED_METHODS};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};
use url::Url;

/// A configured backend service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceRoute {
    /// Service name as configured
    pub service: String,
    /// Absolute base address
    pub base_address: Url,
}

impl ServiceRoute {
    /// Create a route
    ///
    /// # Errors
    /// Returns a configuration error if the address is not an absolute URI
    pub fn new(service: impl Into<String>, base_address: &str) -> GatewayResult<Self> {
        let service = service.into();
        let base_address = Url::parse(base_address).map_err(|e| {
            GatewayError::configuration(format!("service '{service}': invalid base address: {e}"))
        })?;
        if !base_address.has_host() {
            return Err(GatewayError::configuration(format!(
                "service '{service}': base address must be absolute"
            )));
        }
        Ok(Self {
            service,
            base_address,
        })
    }

    /// `host[:port]` of the base address, used as the outbound Host header
    #[must_use]
    pub fn authority(&self) -> String {
        let host = self.base_address.host_str().unwrap_or_default();
        match self.base_address.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

/// Services and ACL entries known to the gateway
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    services: HashMap<String, ServiceRoute>,
    acl: Vec<AclEntry>,
}

impl RouteTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from configuration
    ///
    /// # Errors
    /// Returns a configuration error for invalid addresses or methods
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let mut table = Self::new();
        for service in &config.services {
            table = table.with_service(ServiceRoute::new(&service.name, &service.base_address)?);
        }
        for entry in &config.acl {
            table = table.with_acl_entry(AclEntry::from_config(entry)?);
        }
        info!(
            services = table.services.len(),
            acl_entries = table.acl.len(),
            "Route table built"
        );
        Ok(table)
    }

    /// Add a service route
    #[must_use]
    pub fn with_service(mut self, route: ServiceRoute) -> Self {
        self.services.insert(route.service.to_lowercase(), route);
        self
    }

    /// Add an ACL entry
    #[must_use]
    pub fn with_acl_entry(mut self, entry: AclEntry) -> Self {
        self.acl.push(entry);
        self
    }

    /// Look up a service by name (case-insensitive)
    #[must_use]
    pub fn resolve(&self, service: &str) -> Option<&ServiceRoute> {
        self.services.get(&service.to_lowercase())
    }

    /// Names of all configured services
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.values().map(|route| route.service.as_str())
    }

    /// ACL entries in configuration order
    #[must_use]
    pub fn acl_entries(&self) -> &[AclEntry] {
        &self.acl
    }

    /// Whether the request may be proxied
    #[must_use]
    pub fn is_allowed(&self, envelope: &RequestEnvelope) -> bool {
        self.authorize(envelope).is_ok()
    }

    /// Authorize the request and return its route, or the reason it was rejected
    ///
    /// # Errors
    /// `MethodNotAllowed`, `ServiceNotConfigured` or `RouteNotAllowed`
    pub fn authorize(&self, envelope: &RequestEnvelope) -> GatewayResult<&ServiceRoute> {
        let decision = self.decide(envelope);
        match &decision {
            Ok(route) => debug!(
                service = %route.service,
                method = %envelope.method,
                path = %envelope.path,
                "Route allowed"
            ),
            Err(err) => debug!(
                service = %envelope.service,
                method = %envelope.method,
                path = %envelope.path,
                reason = err.error_code(),
                "Route rejected"
            ),
        }
        decision
    }

    fn decide(&self, envelope: &RequestEnvelope) -> GatewayResult<&ServiceRoute> {
        if !ALLOWED_METHODS.contains(&envelope.method) {
            return Err(GatewayError::MethodNotAllowed {
                method: envelope.method.to_string(),
            });
        }

        let route = self
            .resolve(&envelope.service)
            .ok_or_else(|| GatewayError::service_not_configured(&envelope.service))?;

        let rejected = || {
            GatewayError::route_not_allowed(
                &envelope.service,
                envelope.method.as_str(),
                &envelope.path,
            )
        };
        let path = normalize_path(&envelope.path).ok_or_else(rejected)?;

        let permitted = self
            .acl
            .iter()
            .any(|entry| entry.matches(&envelope.service, &envelope.method, &path));
        if !permitted {
            return Err(rejected());
        }

        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_config::{AclEntryConfig, ServiceConfig};
    use http::Method;

    fn table() -> RouteTable {
        RouteTable::new()
            .with_service(ServiceRoute::new("users", "http://users.internal:8080").unwrap())
            .with_service(ServiceRoute::new("orders", "https://orders.internal").unwrap())
            .with_acl_entry(
                AclEntry::new("users", "/api/users")
                    .with_method(Method::GET)
                    .with_method(Method::POST),
            )
    }

    fn request(service: &str, method: Method, path: &str) -> RequestEnvelope {
        RequestEnvelope::builder(service, method, path).build()
    }

    #[test]
    fn test_allowed_route() {
        let table = table();
        let route = table
            .authorize(&request("Users", Method::GET, "/api/users/1"))
            .unwrap();
        assert_eq!(route.service, "users");
        assert_eq!(route.authority(), "users.internal:8080");
    }

    #[test]
    fn test_method_outside_allow_list() {
        let err = table()
            .authorize(&request("users", Method::OPTIONS, "/api/users"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::MethodNotAllowed { .. }));
        assert_eq!(err.status_code().as_u16(), 405);
    }

    #[test]
    fn test_unknown_service() {
        let err = table()
            .authorize(&request("billing", Method::GET, "/"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::ServiceNotConfigured { .. }));
    }

    #[test]
    fn test_configured_service_without_acl_entry() {
        let err = table()
            .authorize(&request("orders", Method::GET, "/orders"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotAllowed { .. }));
    }

    #[test]
    fn test_decision_is_deterministic() {
        let table = table();
        let req = request("users", Method::POST, "/api/users");
        let first = table.is_allowed(&req);
        for _ in 0..10 {
            assert_eq!(table.is_allowed(&req), first);
        }
        assert!(first);
    }

    #[test]
    fn test_dot_segments_cannot_escape_acl_prefix() {
        let table = RouteTable::new()
            .with_service(ServiceRoute::new("users", "http://users.internal/api").unwrap())
            .with_acl_entry(AclEntry::new("users", "/api/public").with_method(Method::GET));

        assert!(table.is_allowed(&request("users", Method::GET, "/api/public/docs")));
        assert!(table.is_allowed(&request("users", Method::GET, "/api/public/a/../docs")));
        for path in [
            "/api/public/../admin/secrets",
            "/api/public/%2e%2e/admin/secrets",
            "/api/public/%2E./admin",
            "/api/public\\..\\admin",
            "/api/public/../../../etc/passwd",
        ] {
            let err = table
                .authorize(&request("users", Method::GET, path))
                .unwrap_err();
            assert!(matches!(err, GatewayError::RouteNotAllowed { .. }), "{path}");
        }
    }

    #[test]
    fn test_route_serializes_base_address() {
        let route = ServiceRoute::new("users", "http://users.internal:8080/api").unwrap();
        let value = serde_json::to_value(&route).unwrap();
        assert_eq!(value["service"], "users");
        assert_eq!(value["base_address"], "http://users.internal:8080/api");
    }

    #[test]
    fn test_authority_without_explicit_port() {
        let route = ServiceRoute::new("orders", "https://orders.internal/base").unwrap();
        assert_eq!(route.authority(), "orders.internal");
    }

    #[test]
    fn test_relative_address_rejected() {
        assert!(ServiceRoute::new("users", "/relative").is_err());
    }

    #[test]
    fn test_from_config() {
        let mut config = GatewayConfig::default();
        config.services.push(ServiceConfig {
            name: "Users".to_string(),
            base_address: "http://users:80".to_string(),
        });
        config.acl.push(AclEntryConfig {
            service: "users".to_string(),
            methods: vec!["GET".to_string()],
            path_prefix: "/".to_string(),
        });

        let table = RouteTable::from_config(&config).unwrap();
        assert!(table.resolve("USERS").is_some());
        assert!(table.is_allowed(&request("users", Method::GET, "/anything")));
        assert!(!table.is_allowed(&request("users", Method::PUT, "/anything")));
    }
}
