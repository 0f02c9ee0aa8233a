//! API error handling.
//!
//! Every error leaves the gateway in the same JSON shape, carrying the request's
//! correlation id.

use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use gateway_core::{GatewayError, ProxyError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Header echoing the correlation id when no custom name is configured
pub const DEFAULT_CORRELATION_HEADER: &str = "x-correlation-id";

/// API error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details
    pub error: ApiErrorDetail,
}

/// Error detail
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    /// Error message
    pub message: String,
    /// Error code
    pub code: String,
    /// Operator-facing diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Correlation id of the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// API error wrapper
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code
    pub status: StatusCode,
    /// Error code
    pub code: String,
    /// Error message
    pub message: String,
    /// Optional diagnostics
    pub details: Option<String>,
    /// Correlation id, echoed in the body and a response header
    pub correlation_id: Option<String>,
    correlation_header: HeaderName,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
            correlation_id: None,
            correlation_header: HeaderName::from_static(DEFAULT_CORRELATION_HEADER),
        }
    }

    /// Add diagnostics
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Attach the correlation id
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Echo the correlation id under a custom header name
    #[must_use]
    pub fn with_correlation_header(mut self, name: &str) -> Self {
        if let Ok(name) = HeaderName::try_from(name) {
            self.correlation_header = name;
        }
        self
    }

    /// Bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    /// Not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// Payload too large error
    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            format!("Request payload exceeds {limit} bytes"),
        )
    }

    /// Internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_gateway_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        debug!(
            status = %self.status,
            code = %self.code,
            correlation_id = ?self.correlation_id,
            "API error response"
        );

        let header = self
            .correlation_id
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok())
            .map(|value| (self.correlation_header.clone(), value));

        let body = ApiErrorResponse {
            error: ApiErrorDetail {
                message: self.message,
                code: self.code,
                details: self.details,
                correlation_id: self.correlation_id,
            },
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some((name, value)) = header {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut api_err = Self::new(status, err.code, err.message).with_correlation_id(err.correlation_id);
        api_err.details = err.details;
        api_err
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let mut api_err = Self::new(err.status_code(), err.error_code(), err.public_message());
        api_err.details = err.details();
        api_err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ApiError::bad_request("Invalid header")
            .with_details("x-gateway-cache-ttl must be a number")
            .with_correlation_id("abc");

        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "invalid_request");
        assert_eq!(err.correlation_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_proxy_error_conversion() {
        let gateway_err = GatewayError::circuit_open("users");
        let proxy_err = ProxyError::from_gateway_error(&gateway_err, "corr-1");
        let api_err: ApiError = proxy_err.into();

        assert_eq!(api_err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(api_err.code, "backend_unavailable");
        assert_eq!(api_err.correlation_id.as_deref(), Some("corr-1"));
    }

    #[test]
    fn test_response_carries_correlation_header() {
        let response = ApiError::not_found("nope")
            .with_correlation_id("corr-2")
            .with_correlation_header("X-Request-Trace")
            .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("x-request-trace").unwrap(), "corr-2");
    }

    #[test]
    fn test_gateway_error_conversion() {
        let api_err: ApiError = GatewayError::PayloadTooLarge { size: 20, limit: 10 }.into();
        assert_eq!(api_err.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(api_err.message.contains("10"));
    }
}
