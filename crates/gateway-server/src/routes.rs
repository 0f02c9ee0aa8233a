//! Router assembly.

use crate::{
    handlers::{
        forward, health_check, invalidate_cache_key, invalidate_service_cache, list_circuits,
        metrics_endpoint,
    },
    middleware::{access_log_middleware, correlation_id_middleware},
    state::GatewayContext,
};
use axum::{
    middleware,
    routing::{any, delete, get},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the gateway router
///
/// Fixed routes (health, metrics, admin) take precedence over the catch-all forwarding
/// route, so no backend service can be named `health` or `admin`.
pub fn create_router(context: GatewayContext) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/admin/circuits", get(list_circuits))
        .route(
            "/admin/cache/services/:service",
            delete(invalidate_service_cache),
        )
        .route("/admin/cache/keys/:key", delete(invalidate_cache_key));

    let metrics = &context.config().observability.metrics;
    if metrics.enabled {
        router = router.route(&metrics.endpoint, get(metrics_endpoint));
    }

    router
        .route("/:service", any(forward))
        .route("/:service/*path", any(forward))
        .layer(middleware::from_fn(access_log_middleware))
        .layer(middleware::from_fn_with_state(
            context.clone(),
            correlation_id_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}
