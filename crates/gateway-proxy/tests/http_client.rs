//! Integration tests for the HTTP backend client against a local server.

use axum::{
    body::Bytes,
    extract::Request,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{any, get},
    Router,
};
use gateway_config::ForwardingConfig;
use gateway_core::{BackendClient, GatewayError, RequestEnvelope};
use gateway_proxy::{HttpBackendClient, RequestTransformer};
use gateway_routing::ServiceRoute;
use http::Method;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;

async fn echo(headers: HeaderMap, request: Request) -> impl IntoResponse {
    let method = request.method().to_string();
    let uri = request.uri().to_string();
    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let payload = json!({
        "method": method,
        "uri": uri,
        "host": header("host"),
        "correlation": header("x-correlation-id"),
        "content_type": header("content-type"),
        "body": String::from_utf8_lossy(&body),
    });
    ([("x-backend", "echo")], axum::Json(payload))
}

async fn unavailable() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, Bytes::from_static(b"down for maintenance"))
}

async fn spawn_backend() -> SocketAddr {
    let app = Router::new()
        .route("/unavailable", get(unavailable))
        .route("/*path", any(echo));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_post_round_trip() {
    let addr = spawn_backend().await;
    let route = ServiceRoute::new("users", &format!("http://{addr}/")).unwrap();
    let transformer = RequestTransformer::from_config(&ForwardingConfig::default());
    let client = HttpBackendClient::new(&ForwardingConfig::default()).unwrap();

    let envelope = RequestEnvelope::builder("users", Method::POST, "/v1/users")
        .query("dry run", "yes")
        .json(json!({"name": "ada"}))
        .build();
    let outbound = transformer.transform(&envelope, &route, "corr-42").unwrap();

    let response = client.send(outbound).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.headers.get("x-backend").map(String::as_str), Some("echo"));

    let echoed: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["uri"], "/v1/users?dry+run=yes");
    assert_eq!(echoed["host"], addr.to_string());
    assert_eq!(echoed["correlation"], "corr-42");
    assert_eq!(echoed["content_type"], "application/json");
    assert_eq!(echoed["body"], r#"{"name":"ada"}"#);
}

#[tokio::test]
async fn test_error_status_is_not_an_error() {
    let addr = spawn_backend().await;
    let route = ServiceRoute::new("users", &format!("http://{addr}")).unwrap();
    let transformer = RequestTransformer::default();
    let client = HttpBackendClient::new(&ForwardingConfig::default()).unwrap();

    let envelope = RequestEnvelope::builder("users", Method::GET, "unavailable").build();
    let outbound = transformer.transform(&envelope, &route, "c").unwrap();

    let response = client.send(outbound).await.unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.body_excerpt(4), "down");
}

#[tokio::test]
async fn test_connection_refused_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let route = ServiceRoute::new("users", &format!("http://{addr}")).unwrap();
    let transformer = RequestTransformer::default();
    let client = HttpBackendClient::new(&ForwardingConfig::default()).unwrap();

    let envelope = RequestEnvelope::builder("users", Method::GET, "/v1/users").build();
    let outbound = transformer.transform(&envelope, &route, "c").unwrap();

    let err = client.send(outbound).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::BackendUnavailable {
            circuit_open: false,
            ..
        }
    ));
    assert!(err.is_retryable());
    assert!(err.trips_breaker());
}
