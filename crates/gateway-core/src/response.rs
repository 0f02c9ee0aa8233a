//! Backend responses, outbound requests and the pipeline result type.

use crate::error::GatewayError;
use bytes::Bytes;
use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One fully-prepared call to a backend
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Service the call belongs to
    pub service: String,
    /// HTTP method
    pub method: Method,
    /// Absolute target URI (base address, path and encoded query)
    pub url: String,
    /// Headers to send, `host` included
    pub headers: Vec<(String, String)>,
    /// Encoded body; empty for GET/DELETE
    pub body: Bytes,
}

impl OutboundRequest {
    /// Case-insensitive header lookup
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Response received from a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// Raw body
    pub body: Vec<u8>,
}

impl BackendResponse {
    /// Create a response with no headers
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Lossy UTF-8 excerpt of the body
    #[must_use]
    pub fn body_excerpt(&self, max_chars: usize) -> String {
        String::from_utf8_lossy(&self.body).chars().take(max_chars).collect()
    }
}

/// Successful pipeline outcome
#[derive(Debug, Clone, Serialize)]
pub struct ProxyResponse {
    /// HTTP status code
    pub status_code: u16,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// Response body
    #[serde(skip)]
    pub body: Vec<u8>,
    /// Wall-clock time spent in the pipeline
    pub processing_time_ms: u64,
    /// Whether the response was served from cache
    pub from_cache: bool,
    /// Service that produced the response
    pub processed_by_service: String,
    /// Correlation id of the request
    pub correlation_id: String,
}

/// Failed pipeline outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyError {
    /// Short caller-facing message
    pub message: String,
    /// HTTP status code, always in 400..=599
    pub status_code: u16,
    /// Machine-readable error code
    pub code: String,
    /// Operator-facing diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Correlation id of the request
    pub correlation_id: String,
}

impl ProxyError {
    /// Build the caller-facing error from a gateway error
    #[must_use]
    pub fn from_gateway_error(err: &GatewayError, correlation_id: impl Into<String>) -> Self {
        let status = err.status_code().as_u16();
        Self {
            message: err.public_message(),
            status_code: if (400..=599).contains(&status) { status } else { 500 },
            code: err.error_code().to_string(),
            details: err.details(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// Outcome of the forwarding pipeline: exactly one of response or error
#[derive(Debug, Clone)]
pub enum TranslateResult {
    /// Backend (or cache) response
    Response(ProxyResponse),
    /// Gateway-level error
    Error(ProxyError),
}

impl TranslateResult {
    /// HTTP status code of either branch
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Response(response) => response.status_code,
            Self::Error(error) => error.status_code,
        }
    }

    /// Correlation id of either branch
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Response(response) => &response.correlation_id,
            Self::Error(error) => &error.correlation_id,
        }
    }

    /// Whether the response was served from cache
    #[must_use]
    pub fn from_cache(&self) -> bool {
        matches!(self, Self::Response(response) if response.from_cache)
    }

    /// Borrow the response branch
    #[must_use]
    pub fn as_response(&self) -> Option<&ProxyResponse> {
        match self {
            Self::Response(response) => Some(response),
            Self::Error(_) => None,
        }
    }

    /// Borrow the error branch
    #[must_use]
    pub fn as_error(&self) -> Option<&ProxyError> {
        match self {
            Self::Response(_) => None,
            Self::Error(error) => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TimeoutScope;
    use std::time::Duration;

    #[test]
    fn test_backend_response_success_range() {
        assert!(BackendResponse::new(200, "ok").is_success());
        assert!(BackendResponse::new(204, Vec::new()).is_success());
        assert!(!BackendResponse::new(304, Vec::new()).is_success());
        assert!(!BackendResponse::new(503, "down").is_success());
    }

    #[test]
    fn test_proxy_error_shape() {
        let err = GatewayError::timeout("orders", Duration::from_secs(5), TimeoutScope::Overall);
        let proxy = ProxyError::from_gateway_error(&err, "corr-1");

        assert_eq!(proxy.status_code, 504);
        assert_eq!(proxy.code, "backend_timeout");
        assert_eq!(proxy.correlation_id, "corr-1");
        assert!(proxy.details.is_some());
    }

    #[test]
    fn test_translate_result_accessors() {
        let result = TranslateResult::Error(ProxyError::from_gateway_error(
            &GatewayError::circuit_open("orders"),
            "corr-2",
        ));
        assert_eq!(result.status_code(), 502);
        assert_eq!(result.correlation_id(), "corr-2");
        assert!(!result.from_cache());
        assert!(result.as_response().is_none());
    }
}
