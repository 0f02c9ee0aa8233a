//! HTTP request handlers for the gateway API.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use gateway_core::{ProxyResponse, RequestBody, RequestEnvelope, TranslateResult};
use gateway_resilience::BreakerSnapshot;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

use crate::{
    error::ApiError,
    extractors::{CacheDirectives, CorrelationId, CACHE_DIRECTIVE_HEADER, CACHE_TTL_HEADER},
    state::GatewayContext,
};

/// Response header reporting whether the cache served the request
pub const CACHE_STATUS_HEADER: &str = "x-gateway-cache-status";

/// Response header reporting pipeline time
pub const PROCESSING_TIME_HEADER: &str = "x-gateway-processing-time-ms";

/// Response header naming the service that answered
pub const SERVICE_HEADER: &str = "x-gateway-service";

/// Upstream headers not copied to the caller
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "content-length",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Version
    pub version: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Configured backend services
    pub services: usize,
}

/// Health check endpoint
pub async fn health_check(State(context): State<GatewayContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: context.uptime_seconds(),
        services: context.config().services.len(),
    })
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics_endpoint(State(context): State<GatewayContext>) -> Response {
    match context.metrics() {
        Some(metrics) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.gather(),
        )
            .into_response(),
        None => ApiError::not_found("Metrics are disabled").into_response(),
    }
}

/// Circuit breaker states of every known service
pub async fn list_circuits(State(context): State<GatewayContext>) -> Json<Vec<BreakerSnapshot>> {
    Json(context.pipeline().engine().breakers().snapshots())
}

/// Result of a service-wide cache invalidation
#[derive(Debug, Serialize)]
pub struct ServiceInvalidation {
    /// Service whose entries were dropped
    pub service: String,
    /// Number of entries removed
    pub removed: usize,
}

/// Drop every cached response of a service
#[instrument(skip(context))]
pub async fn invalidate_service_cache(
    State(context): State<GatewayContext>,
    Path(service): Path<String>,
) -> Json<ServiceInvalidation> {
    let removed = context.pipeline().invalidate_cache_for_service(&service).await;
    Json(ServiceInvalidation { service, removed })
}

/// Result of a single-key cache invalidation
#[derive(Debug, Serialize)]
pub struct KeyInvalidation {
    /// Storage key
    pub key: String,
    /// Whether an entry existed
    pub removed: bool,
}

/// Drop one cached response
#[instrument(skip(context))]
pub async fn invalidate_cache_key(
    State(context): State<GatewayContext>,
    Path(key): Path<String>,
) -> Json<KeyInvalidation> {
    let removed = context.pipeline().invalidate_cache_key(&key).await;
    Json(KeyInvalidation { key, removed })
}

/// Catch-all forwarding endpoint: `/{service}/{path..}`
pub async fn forward(
    State(context): State<GatewayContext>,
    Path(params): Path<HashMap<String, String>>,
    CorrelationId(correlation_id): CorrelationId,
    directives: CacheDirectives,
    request: Request,
) -> Response {
    let correlation_header = context.config().forwarding.correlation_header.clone();
    let reject = |err: ApiError| {
        err.with_correlation_id(correlation_id.clone())
            .with_correlation_header(&correlation_header)
            .into_response()
    };

    let Some(service) = params.get("service").cloned() else {
        return reject(ApiError::not_found("Missing service name"));
    };

    let envelope = match build_envelope(&context, service, directives, request).await {
        Ok(envelope) => envelope,
        Err(err) => return reject(err),
    };

    debug!(
        service = %envelope.service,
        method = %envelope.method,
        path = %envelope.path,
        correlation_id = %correlation_id,
        "Forwarding request"
    );

    match context.pipeline().process(envelope).await {
        TranslateResult::Response(response) => render_response(response, &correlation_header),
        TranslateResult::Error(error) => ApiError::from(error)
            .with_correlation_header(&correlation_header)
            .into_response(),
    }
}

async fn build_envelope(
    context: &GatewayContext,
    service: String,
    directives: CacheDirectives,
    request: Request,
) -> Result<RequestEnvelope, ApiError> {
    let (parts, body) = request.into_parts();
    let path = service_path(parts.uri.path());

    let query: BTreeMap<String, String> = parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let headers = collect_headers(&parts.headers);

    let limit = context.config().server.max_request_body_size;
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| ApiError::payload_too_large(limit))?;
    let body = decode_body(&parts.headers, &bytes)?;

    Ok(RequestEnvelope {
        service,
        method: parts.method,
        path,
        query,
        headers,
        body,
        cache_override: directives.enabled,
        cache_ttl_override_minutes: directives.ttl_minutes,
    })
}

/// Path after the service segment, still percent-encoded as received
fn service_path(uri_path: &str) -> String {
    let trimmed = uri_path.trim_start_matches('/');
    let rest = trimmed.split_once('/').map_or("", |(_, rest)| rest);
    format!("/{rest}")
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut collected: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let name = name.as_str();
        if name == CACHE_DIRECTIVE_HEADER || name == CACHE_TTL_HEADER {
            continue;
        }
        let Ok(value) = value.to_str() else {
            continue;
        };
        collected
            .entry(name.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    collected
}

fn decode_body(headers: &HeaderMap, bytes: &[u8]) -> Result<Option<RequestBody>, ApiError> {
    if bytes.is_empty() {
        return Ok(None);
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("application/json") || ct.contains("+json")
        });

    if is_json {
        let value = serde_json::from_slice(bytes)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?;
        return Ok(Some(RequestBody::Json(value)));
    }

    String::from_utf8(bytes.to_vec())
        .map(|text| Some(RequestBody::Text(text)))
        .map_err(|_| ApiError::bad_request("Request body must be valid UTF-8"))
}

fn render_response(response: ProxyResponse, correlation_header: &str) -> Response {
    let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut rendered = Response::builder().status(status);

    if let Some(headers) = rendered.headers_mut() {
        for (name, value) in &response.headers {
            if HOP_BY_HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) =
                (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value))
            {
                headers.append(name, value);
            }
        }

        let cache_status = if response.from_cache { "HIT" } else { "MISS" };
        headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static(cache_status));
        headers.insert(PROCESSING_TIME_HEADER, HeaderValue::from(response.processing_time_ms));
        if let Ok(value) = HeaderValue::from_str(&response.processed_by_service) {
            headers.insert(SERVICE_HEADER, value);
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(correlation_header),
            HeaderValue::from_str(&response.correlation_id),
        ) {
            headers.insert(name, value);
        }
    }

    rendered
        .body(Body::from(response.body))
        .unwrap_or_else(|_| ApiError::internal("Failed to render response").into_response())
}
