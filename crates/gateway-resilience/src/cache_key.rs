//! Cache key derivation.
//!
//! A request is reduced to a canonical JSON document (service and path lowercased,
//! method uppercased, query and headers sorted, credentials dropped), hashed with
//! SHA-256 and hex-encoded. The digest is truncated and namespaced per service so a
//! whole service can be invalidated by prefix.

use gateway_core::RequestEnvelope;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Headers that never take part in a cache key
pub const CREDENTIAL_HEADERS: [&str; 4] = ["authorization", "cookie", "x-api-key", "x-auth-token"];

/// Hex length of a full SHA-256 digest
const FULL_DIGEST_LEN: usize = 64;

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    service: String,
    method: String,
    path: String,
    query: BTreeMap<&'a str, &'a str>,
    headers: BTreeMap<String, String>,
}

/// Derived cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    service: String,
    digest: String,
    storage_key: String,
}

impl CacheKey {
    /// Lowercased service name
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Truncated hex digest
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Namespaced key used against the store
    #[must_use]
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key)
    }
}

/// Turns envelopes into cache keys
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    prefix: String,
    key_length: usize,
    excluded_headers: HashSet<String>,
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new("gateway:cache:", 16)
    }
}

impl CacheKeyGenerator {
    /// Create a generator. `key_length` is clamped to `1..=64` hex characters.
    #[must_use]
    pub fn new(prefix: impl Into<String>, key_length: usize) -> Self {
        Self {
            prefix: prefix.into(),
            key_length: key_length.clamp(1, FULL_DIGEST_LEN),
            excluded_headers: CREDENTIAL_HEADERS.iter().map(|h| (*h).to_string()).collect(),
        }
    }

    /// Also leave this header out of keys (e.g. the correlation id)
    #[must_use]
    pub fn excluding_header(mut self, name: &str) -> Self {
        self.excluded_headers.insert(name.to_lowercase());
        self
    }

    /// Store namespace
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix shared by every key of a service
    #[must_use]
    pub fn service_prefix(&self, service: &str) -> String {
        format!("{}{}:", self.prefix, service.to_lowercase())
    }

    /// Lowercased headers minus exclusions; values of names differing only in case are
    /// joined in sorted order
    fn canonical_headers(&self, headers: &HashMap<String, String>) -> BTreeMap<String, String> {
        let mut pairs: Vec<(String, &str)> = headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()))
            .filter(|(k, _)| !self.excluded_headers.contains(k))
            .collect();
        pairs.sort_unstable();

        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in pairs {
            merged
                .entry(name)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
        merged
    }

    /// Derive the key of a request
    #[must_use]
    pub fn generate(&self, envelope: &RequestEnvelope) -> CacheKey {
        let service = envelope.service.to_lowercase();
        let canonical = CanonicalRequest {
            service: service.clone(),
            method: envelope.method.as_str().to_uppercase(),
            path: envelope.path.to_lowercase(),
            query: envelope
                .query
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            headers: self.canonical_headers(&envelope.headers),
        };

        // Serializing a struct of strings and ordered maps cannot fail
        let document = serde_json::to_vec(&canonical).unwrap_or_default();
        let mut digest = hex::encode(Sha256::digest(&document));
        digest.truncate(self.key_length);

        let storage_key = format!("{}{digest}", self.service_prefix(&service));
        CacheKey {
            service,
            digest,
            storage_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn base() -> gateway_core::RequestEnvelopeBuilder {
        RequestEnvelope::builder("Users", Method::GET, "/api/Users/42")
    }

    #[test]
    fn test_key_shape() {
        let key = CacheKeyGenerator::default().generate(&base().build());
        assert_eq!(key.digest().len(), 16);
        assert!(key.digest().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key.service(), "users");
        assert_eq!(
            key.storage_key(),
            format!("gateway:cache:users:{}", key.digest())
        );
    }

    #[test]
    fn test_configurable_length() {
        let key = CacheKeyGenerator::new("c:", 64).generate(&base().build());
        assert_eq!(key.digest().len(), 64);
        let key = CacheKeyGenerator::new("c:", 500).generate(&base().build());
        assert_eq!(key.digest().len(), 64);
    }

    #[test]
    fn test_query_and_header_order_invariant() {
        let keys = CacheKeyGenerator::default();
        let a = base()
            .query("b", "2")
            .query("a", "1")
            .header("Accept", "application/json")
            .header("X-Tenant", "t1")
            .build();
        let b = base()
            .query("a", "1")
            .query("b", "2")
            .header("x-tenant", "t1")
            .header("accept", "application/json")
            .build();
        assert_eq!(keys.generate(&a), keys.generate(&b));
    }

    #[test]
    fn test_header_names_differing_in_case_are_merged() {
        let keys = CacheKeyGenerator::default();
        let merged = keys.generate(
            &base()
                .header("accept", "application/json, text/html")
                .build(),
        );
        for _ in 0..20 {
            let upper_first = base()
                .header("Accept", "text/html")
                .header("accept", "application/json")
                .build();
            let lower_first = base()
                .header("accept", "application/json")
                .header("ACCEPT", "text/html")
                .build();
            assert_eq!(keys.generate(&upper_first), merged);
            assert_eq!(keys.generate(&lower_first), merged);
        }
    }

    #[test]
    fn test_case_normalization() {
        let keys = CacheKeyGenerator::default();
        let a = RequestEnvelope::builder("USERS", Method::GET, "/API/USERS/42").build();
        assert_eq!(keys.generate(&a), keys.generate(&base().build()));
    }

    #[test]
    fn test_path_and_method_sensitive() {
        let keys = CacheKeyGenerator::default();
        let original = keys.generate(&base().build());
        let other_path = RequestEnvelope::builder("users", Method::GET, "/api/users/43").build();
        let other_method = RequestEnvelope::builder("users", Method::DELETE, "/api/users/42").build();
        assert_ne!(original, keys.generate(&other_path));
        assert_ne!(original, keys.generate(&other_method));
    }

    #[test]
    fn test_query_values_matter() {
        let keys = CacheKeyGenerator::default();
        let a = base().query("page", "1").build();
        let b = base().query("page", "2").build();
        assert_ne!(keys.generate(&a), keys.generate(&b));
    }

    #[test]
    fn test_credentials_excluded() {
        let keys = CacheKeyGenerator::default().excluding_header("X-Correlation-Id");
        let plain = keys.generate(&base().build());
        let with_credentials = base()
            .header("Authorization", "Bearer abc")
            .header("Cookie", "session=1")
            .header("X-Api-Key", "k")
            .header("X-Auth-Token", "t")
            .header("x-correlation-id", "c-123")
            .build();
        assert_eq!(plain, keys.generate(&with_credentials));
    }

    #[test]
    fn test_service_prefix() {
        let keys = CacheKeyGenerator::default();
        let key = keys.generate(&base().build());
        assert!(key.storage_key().starts_with(&keys.service_prefix("USERS")));
    }
}
