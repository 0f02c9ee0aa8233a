//! HTTP middleware for the gateway.
//!
//! Provides middleware for:
//! - Correlation id injection
//! - Access logging

use crate::state::GatewayContext;
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Correlation id of the current request, stored in request extensions
#[derive(Clone, Debug)]
pub struct CorrelationIdExt(pub String);

/// Ensure every request carries a correlation id and echo it on the response
///
/// The inbound value is kept when present; otherwise a UUID v4 is generated and written
/// into the request headers so the forwarding pipeline sees the same id.
pub async fn correlation_id_middleware(
    State(context): State<GatewayContext>,
    mut request: Request,
    next: Next,
) -> Response {
    let header_name = context.config().forwarding.correlation_header.to_ascii_lowercase();
    let Ok(header) = HeaderName::try_from(header_name.as_str()) else {
        return next.run(request).await;
    };

    let correlation_id = request
        .headers()
        .get(&header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert(header.clone(), value);
    }
    request
        .extensions_mut()
        .insert(CorrelationIdExt(correlation_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(header, value);
    }

    response
}

/// Access log middleware
pub async fn access_log_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let correlation_id = request
        .extensions()
        .get::<CorrelationIdExt>()
        .map_or_else(|| "unknown".to_string(), |c| c.0.clone());

    let span = info_span!(
        "http_request",
        method = %method,
        uri = %uri,
        correlation_id = %correlation_id,
    );

    let start = Instant::now();

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();
    let cache = response
        .headers()
        .get(crate::handlers::CACHE_STATUS_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    info!(
        method = %method,
        uri = %uri,
        status = status.as_u16(),
        cache = %cache,
        duration_ms = duration.as_millis(),
        correlation_id = %correlation_id,
        "Request completed"
    );

    response
}
