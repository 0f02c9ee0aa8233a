//! Error types and handling for the gateway.
//!
//! Every failure the forwarding pipeline can produce is a [`GatewayError`]. Each variant
//! maps to a stable HTTP status code and a short machine-readable code, so the HTTP
//! adapter never has to inspect error messages.

use http::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using `GatewayError`
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Which timeout layer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScope {
    /// A single backend attempt exceeded its budget
    Attempt,
    /// The whole operation, retries included, exceeded its budget
    Overall,
}

impl fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attempt => write!(f, "attempt"),
            Self::Overall => write!(f, "overall"),
        }
    }
}

/// Gateway error taxonomy
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// HTTP method is not in the gateway-wide allow-list
    #[error("Method not allowed: {method}")]
    MethodNotAllowed {
        /// Rejected method
        method: String,
    },

    /// Target service has no configured route
    #[error("Service not configured: {service}")]
    ServiceNotConfigured {
        /// Requested service name
        service: String,
    },

    /// No ACL entry permits the service/method/path combination
    #[error("Route not allowed: {method} {service}{path}")]
    RouteNotAllowed {
        /// Requested service name
        service: String,
        /// Request method
        method: String,
        /// Request path
        path: String,
    },

    /// Request payload exceeds the forwarding limit
    #[error("Request payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Actual size of the payload
        size: usize,
        /// Maximum allowed size
        limit: usize,
    },

    /// Backend did not answer in time
    #[error("Backend {service} timed out after {duration:?} ({scope} timeout)")]
    BackendTimeout {
        /// Target service
        service: String,
        /// Budget that was exceeded
        duration: Duration,
        /// Which layer enforced the budget
        scope: TimeoutScope,
    },

    /// Backend cannot be reached, either because the circuit is open or the transport failed
    #[error("Backend {service} unavailable: {message}")]
    BackendUnavailable {
        /// Target service
        service: String,
        /// What went wrong
        message: String,
        /// Whether the rejection came from an open circuit breaker
        circuit_open: bool,
    },

    /// Backend answered with an error status that is final
    #[error("Backend {service} responded with status {status}")]
    BackendBadResponse {
        /// Target service
        service: String,
        /// Upstream status code
        status: u16,
        /// Excerpt of the upstream body, for operators
        body_excerpt: Option<String>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Unclassified failure inside the gateway
    #[error("Internal gateway error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl GatewayError {
    /// Get the HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::ServiceNotConfigured { .. } | Self::RouteNotAllowed { .. } => {
                StatusCode::FORBIDDEN
            }
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::BackendUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::BackendBadResponse { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Self::Configuration { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the retry layer may re-attempt after this error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BackendTimeout { scope, .. } => *scope == TimeoutScope::Attempt,
            Self::BackendUnavailable { circuit_open, .. } => !circuit_open,
            _ => false,
        }
    }

    /// Whether this error counts against the circuit breaker
    #[must_use]
    pub fn trips_breaker(&self) -> bool {
        match self {
            Self::BackendTimeout { .. } => true,
            Self::BackendUnavailable { circuit_open, .. } => !circuit_open,
            Self::BackendBadResponse { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Whether the error was produced by authorization
    #[must_use]
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            Self::MethodNotAllowed { .. }
                | Self::ServiceNotConfigured { .. }
                | Self::RouteNotAllowed { .. }
        )
    }

    /// Get the error code for programmatic handling
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::ServiceNotConfigured { .. } => "service_not_configured",
            Self::RouteNotAllowed { .. } => "route_not_allowed",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::BackendTimeout { .. } => "backend_timeout",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::BackendBadResponse { .. } => "backend_bad_response",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_gateway_error",
        }
    }

    /// Short caller-facing message. Internal details stay in logs and `details`.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::MethodNotAllowed { method } => format!("Method {method} is not allowed"),
            Self::ServiceNotConfigured { .. } | Self::RouteNotAllowed { .. } => {
                "Route is not allowed".to_string()
            }
            Self::PayloadTooLarge { limit, .. } => {
                format!("Request payload exceeds {limit} bytes")
            }
            Self::BackendTimeout { service, .. } => format!("Service {service} timed out"),
            Self::BackendUnavailable { service, .. } => {
                format!("Service {service} is unavailable")
            }
            Self::BackendBadResponse { service, status, .. } => {
                format!("Service {service} responded with status {status}")
            }
            Self::Configuration { .. } | Self::Internal { .. } => {
                "Internal gateway error".to_string()
            }
        }
    }

    /// Operator-facing detail string
    #[must_use]
    pub fn details(&self) -> Option<String> {
        match self {
            Self::BackendBadResponse { body_excerpt, .. } => body_excerpt.clone(),
            Self::MethodNotAllowed { .. } => None,
            other => Some(other.to_string()),
        }
    }

    /// Create a route-not-allowed error
    #[must_use]
    pub fn route_not_allowed(
        service: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self::RouteNotAllowed {
            service: service.into(),
            method: method.into(),
            path: path.into(),
        }
    }

    /// Create a service-not-configured error
    #[must_use]
    pub fn service_not_configured(service: impl Into<String>) -> Self {
        Self::ServiceNotConfigured {
            service: service.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(service: impl Into<String>, duration: Duration, scope: TimeoutScope) -> Self {
        Self::BackendTimeout {
            service: service.into(),
            duration,
            scope,
        }
    }

    /// Create an error for an open circuit
    #[must_use]
    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            service: service.into(),
            message: "circuit breaker is open".to_string(),
            circuit_open: true,
        }
    }

    /// Create a transport-level unavailability error
    #[must_use]
    pub fn transport(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            service: service.into(),
            message: message.into(),
            circuit_open: false,
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
