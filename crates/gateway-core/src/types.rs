//! Request envelope: the canonical in-flight request.
//!
//! An envelope is built once at pipeline entry and never mutated afterwards. Every
//! transformation (cache key derivation, outbound rewriting) reads it and produces a
//! new value.

use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Methods the gateway will ever forward
pub const ALLOWED_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
];

/// Request body as supplied by the edge adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestBody {
    /// Structured value, serialized to JSON on the wire
    Json(serde_json::Value),
    /// Already-encoded text, forwarded verbatim
    Text(String),
}

impl RequestBody {
    /// Encode the body into its wire form
    ///
    /// # Errors
    /// Returns a serialization error if a structured value cannot be encoded
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Json(value) => serde_json::to_vec(value),
            Self::Text(text) => Ok(text.as_bytes().to_vec()),
        }
    }
}

/// Canonical in-flight request
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    /// Target service name
    pub service: String,
    /// HTTP method
    pub method: Method,
    /// Path relative to the service base address
    pub path: String,
    /// Query parameters
    pub query: BTreeMap<String, String>,
    /// Caller-supplied headers
    pub headers: HashMap<String, String>,
    /// Optional body
    pub body: Option<RequestBody>,
    /// Explicit cache opt-in/opt-out; `None` follows the gateway default
    pub cache_override: Option<bool>,
    /// Per-request cache TTL in minutes
    pub cache_ttl_override_minutes: Option<u32>,
}

impl RequestEnvelope {
    /// Create a new envelope builder
    #[must_use]
    pub fn builder(service: impl Into<String>, method: Method, path: impl Into<String>) -> RequestEnvelopeBuilder {
        RequestEnvelopeBuilder::new(service, method, path)
    }

    /// Case-insensitive header lookup
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the method is an idempotent read
    #[must_use]
    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }
}

/// Builder for [`RequestEnvelope`]
#[derive(Debug)]
pub struct RequestEnvelopeBuilder {
    envelope: RequestEnvelope,
}

impl RequestEnvelopeBuilder {
    fn new(service: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            envelope: RequestEnvelope {
                service: service.into(),
                method,
                path: path.into(),
                query: BTreeMap::new(),
                headers: HashMap::new(),
                body: None,
                cache_override: None,
                cache_ttl_override_minutes: None,
            },
        }
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envelope.query.insert(key.into(), value.into());
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envelope.headers.insert(key.into(), value.into());
        self
    }

    /// Set a structured JSON body
    #[must_use]
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.envelope.body = Some(RequestBody::Json(value));
        self
    }

    /// Set a verbatim text body
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.envelope.body = Some(RequestBody::Text(text.into()));
        self
    }

    /// Set the body
    #[must_use]
    pub fn body(mut self, body: Option<RequestBody>) -> Self {
        self.envelope.body = body;
        self
    }

    /// Opt in or out of caching
    #[must_use]
    pub fn cache_override(mut self, enabled: bool) -> Self {
        self.envelope.cache_override = Some(enabled);
        self
    }

    /// Override the cache TTL in minutes
    #[must_use]
    pub fn cache_ttl_minutes(mut self, minutes: u32) -> Self {
        self.envelope.cache_ttl_override_minutes = Some(minutes);
        self
    }

    /// Build the envelope
    #[must_use]
    pub fn build(self) -> RequestEnvelope {
        self.envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let envelope = RequestEnvelope::builder("users", Method::GET, "/api/users/42")
            .query("expand", "roles")
            .header("X-Trace", "abc")
            .cache_ttl_minutes(5)
            .build();

        assert_eq!(envelope.service, "users");
        assert_eq!(envelope.query.get("expand").map(String::as_str), Some("roles"));
        assert_eq!(envelope.cache_ttl_override_minutes, Some(5));
        assert!(envelope.is_get());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let envelope = RequestEnvelope::builder("users", Method::GET, "/")
            .header("X-Correlation-ID", "c-1")
            .build();
        assert_eq!(envelope.header("x-correlation-id"), Some("c-1"));
        assert_eq!(envelope.header("missing"), None);
    }

    #[test]
    fn test_body_wire_form() {
        let body = RequestBody::Json(json!({"name": "ada"}));
        assert_eq!(body.to_wire().unwrap(), br#"{"name":"ada"}"#.to_vec());

        let body = RequestBody::Text("{\"raw\":true}".to_string());
        assert_eq!(body.to_wire().unwrap(), b"{\"raw\":true}".to_vec());
    }
}
