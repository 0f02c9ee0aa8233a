//! Backend client abstraction.
//!
//! The pipeline never talks to the network directly; it hands a prepared
//! [`OutboundRequest`] to a [`BackendClient`]. The HTTP implementation lives in
//! `gateway-proxy`, tests plug in scripted clients.

use crate::error::GatewayError;
use crate::response::{BackendResponse, OutboundRequest};
use async_trait::async_trait;

/// Performs exactly one call against a backend service
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    /// Send the request and return whatever the backend answered
    ///
    /// Non-2xx statuses are returned as `Ok`; only transport failures and client-side
    /// timeouts are errors.
    ///
    /// # Errors
    /// Returns `GatewayError::BackendUnavailable` or `GatewayError::BackendTimeout`
    async fn send(&self, request: OutboundRequest) -> Result<BackendResponse, GatewayError>;

    /// Client name for logs
    fn name(&self) -> &str {
        "backend"
    }
}
