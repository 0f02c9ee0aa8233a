//! Outbound request rewriting.
//!
//! Turns an authorized [`RequestEnvelope`] into the exact [`OutboundRequest`] sent to the
//! backend. The envelope is only read; every call produces a fresh request, so retries
//! re-derive identical output.

use bytes::Bytes;
use gateway_config::ForwardingConfig;
use gateway_core::{GatewayError, GatewayResult, OutboundRequest, RequestEnvelope};
use gateway_routing::{normalize_path, ServiceRoute};
use http::Method;
use tracing::trace;
use url::form_urlencoded;
use uuid::Uuid;

/// Hop-by-hop and framing headers that are never copied from the caller
pub const FORBIDDEN_HEADERS: [&str; 10] = [
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "upgrade",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
];

const JSON_CONTENT_TYPE: &str = "application/json";

/// Rewrites envelopes into backend calls
#[derive(Debug, Clone)]
pub struct RequestTransformer {
    max_body_bytes: usize,
    correlation_header: String,
}

impl Default for RequestTransformer {
    fn default() -> Self {
        Self::from_config(&ForwardingConfig::default())
    }
}

impl RequestTransformer {
    /// Create a transformer
    #[must_use]
    pub fn new(max_body_bytes: usize, correlation_header: impl Into<String>) -> Self {
        Self {
            max_body_bytes,
            correlation_header: correlation_header.into().to_ascii_lowercase(),
        }
    }

    /// Create from forwarding configuration
    #[must_use]
    pub fn from_config(config: &ForwardingConfig) -> Self {
        Self::new(config.max_body_bytes, &config.correlation_header)
    }

    /// Name of the correlation header, lowercase
    #[must_use]
    pub fn correlation_header(&self) -> &str {
        &self.correlation_header
    }

    /// Correlation id of a request: the caller's, or a fresh UUID v4
    #[must_use]
    pub fn correlation_id(&self, envelope: &RequestEnvelope) -> String {
        envelope
            .header(&self.correlation_header)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string)
    }

    /// Build the outbound request
    ///
    /// # Errors
    /// Returns `RouteNotAllowed` if the path climbs above the root, `PayloadTooLarge` if
    /// the encoded body exceeds the limit, or an internal error if a structured body
    /// cannot be serialized
    pub fn transform(
        &self,
        envelope: &RequestEnvelope,
        route: &ServiceRoute,
        correlation_id: &str,
    ) -> GatewayResult<OutboundRequest> {
        let path = normalize_path(&envelope.path).ok_or_else(|| {
            GatewayError::route_not_allowed(
                &envelope.service,
                envelope.method.as_str(),
                &envelope.path,
            )
        })?;
        let url = target_url(route, &path, envelope);
        let body = self.encode_body(envelope)?;

        let mut headers: Vec<(String, String)> = envelope
            .headers
            .iter()
            .filter(|(name, _)| {
                let name = name.to_ascii_lowercase();
                !FORBIDDEN_HEADERS.contains(&name.as_str()) && name != self.correlation_header
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        headers.push(("host".to_string(), route.authority()));
        headers.push((self.correlation_header.clone(), correlation_id.to_string()));

        if carries_body(&envelope.method) {
            let has_content_type = headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                headers.push(("content-type".to_string(), JSON_CONTENT_TYPE.to_string()));
            }
        }
        headers.push(("content-length".to_string(), body.len().to_string()));

        trace!(
            service = %envelope.service,
            method = %envelope.method,
            url = %url,
            body_bytes = body.len(),
            "Outbound request prepared"
        );

        Ok(OutboundRequest {
            service: route.service.clone(),
            method: envelope.method.clone(),
            url,
            headers,
            body,
        })
    }

    fn encode_body(&self, envelope: &RequestEnvelope) -> GatewayResult<Bytes> {
        if !carries_body(&envelope.method) {
            return Ok(Bytes::new());
        }
        let Some(body) = &envelope.body else {
            return Ok(Bytes::new());
        };
        let encoded = body
            .to_wire()
            .map_err(|e| GatewayError::internal(format!("failed to encode request body: {e}")))?;
        if encoded.len() > self.max_body_bytes {
            return Err(GatewayError::PayloadTooLarge {
                size: encoded.len(),
                limit: self.max_body_bytes,
            });
        }
        Ok(Bytes::from(encoded))
    }
}

fn carries_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::DELETE)
}

fn target_url(route: &ServiceRoute, path: &str, envelope: &RequestEnvelope) -> String {
    let base = route.base_address.as_str().trim_end_matches('/');
    let path = path.trim_start_matches('/');
    let mut url = if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    };

    if !envelope.query.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(envelope.query.iter())
            .finish();
        url.push('?');
        url.push_str(&query);
    }
    url
}
