//! HTTP backend client.

use async_trait::async_trait;
use gateway_config::ForwardingConfig;
use gateway_core::{
    BackendClient, BackendResponse, GatewayError, OutboundRequest, TimeoutScope,
};
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// [`BackendClient`] backed by a pooled `reqwest` client
///
/// The client has no request timeout of its own; attempt and overall budgets are
/// enforced by the resilience layers around it. Redirects are returned to the caller
/// untouched.
#[derive(Debug, Clone)]
pub struct HttpBackendClient {
    client: Client,
    connect_timeout: Duration,
}

impl HttpBackendClient {
    /// Create a client
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created
    pub fn new(config: &ForwardingConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            connect_timeout: config.connect_timeout,
        })
    }

    fn map_error(&self, service: &str, err: &reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::timeout(service, self.connect_timeout, TimeoutScope::Attempt)
        } else if err.is_builder() {
            GatewayError::internal(format!("invalid outbound request: {err}"))
        } else {
            GatewayError::transport(service, format!("Request failed: {err}"))
        }
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn send(&self, request: OutboundRequest) -> Result<BackendResponse, GatewayError> {
        let OutboundRequest {
            service,
            method,
            url,
            headers,
            body,
        } = request;

        debug!(service = %service, method = %method, url = %url, "Sending backend request");

        let mut builder = self.client.request(method, &url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_error(&service, &e))?;

        let status = response.status().as_u16();
        let mut response_headers = BTreeMap::new();
        for (name, value) in response.headers() {
            match value.to_str() {
                Ok(value) => {
                    response_headers
                        .entry(name.as_str().to_string())
                        .and_modify(|existing: &mut String| {
                            existing.push_str(", ");
                            existing.push_str(value);
                        })
                        .or_insert_with(|| value.to_string());
                }
                Err(_) => warn!(service = %service, header = %name, "Dropping non-UTF-8 response header"),
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_error(&service, &e))?;

        debug!(service = %service, status, body_bytes = body.len(), "Backend responded");

        Ok(BackendResponse {
            status,
            headers: response_headers,
            body: body.to_vec(),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}
