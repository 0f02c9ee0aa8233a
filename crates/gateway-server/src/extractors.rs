//! Custom Axum extractors for the gateway.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use uuid::Uuid;

use crate::{error::ApiError, middleware::CorrelationIdExt};

/// Header opting a request in to or out of the response cache
pub const CACHE_DIRECTIVE_HEADER: &str = "x-gateway-cache";

/// Header overriding the cache TTL, in minutes
pub const CACHE_TTL_HEADER: &str = "x-gateway-cache-ttl";

/// Correlation id set by the correlation middleware, or a fresh one
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .extensions
            .get::<CorrelationIdExt>()
            .map_or_else(|| Uuid::new_v4().to_string(), |c| c.0.clone());
        Ok(Self(id))
    }
}

/// Per-request cache directives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    /// Explicit opt-in (`true`) or opt-out (`false`)
    pub enabled: Option<bool>,
    /// TTL override in minutes
    pub ttl_minutes: Option<u32>,
}

#[async_trait]
impl<S> FromRequestParts<S> for CacheDirectives
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| -> Result<Option<String>, ApiError> {
            parts
                .headers
                .get(name)
                .map(|v| {
                    v.to_str()
                        .map(|s| s.trim().to_ascii_lowercase())
                        .map_err(|_| ApiError::bad_request(format!("Invalid {name} header")))
                })
                .transpose()
        };

        let enabled = header(CACHE_DIRECTIVE_HEADER)?
            .map(|value| parse_directive(&value))
            .transpose()?;

        let ttl_minutes = header(CACHE_TTL_HEADER)?
            .map(|value| {
                value.parse::<u32>().map_err(|_| {
                    ApiError::bad_request(format!("{CACHE_TTL_HEADER} must be a whole number of minutes"))
                })
            })
            .transpose()?;

        Ok(Self {
            enabled,
            ttl_minutes,
        })
    }
}

fn parse_directive(value: &str) -> Result<bool, ApiError> {
    match value {
        "on" | "true" | "1" | "use" => Ok(true),
        "off" | "false" | "0" | "bypass" | "no-cache" => Ok(false),
        other => Err(ApiError::bad_request(format!(
            "Unknown {CACHE_DIRECTIVE_HEADER} value: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn directives(headers: &[(&str, &str)]) -> Result<CacheDirectives, ApiError> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        CacheDirectives::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_no_directives() {
        assert_eq!(directives(&[]).await.unwrap(), CacheDirectives::default());
    }

    #[tokio::test]
    async fn test_directives_parsed() {
        let parsed = directives(&[("X-Gateway-Cache", "Bypass"), ("x-gateway-cache-ttl", "15")])
            .await
            .unwrap();
        assert_eq!(parsed.enabled, Some(false));
        assert_eq!(parsed.ttl_minutes, Some(15));

        let parsed = directives(&[("x-gateway-cache", "on")]).await.unwrap();
        assert_eq!(parsed.enabled, Some(true));
    }

    #[tokio::test]
    async fn test_invalid_directives_rejected() {
        assert!(directives(&[("x-gateway-cache", "sometimes")]).await.is_err());
        assert!(directives(&[("x-gateway-cache-ttl", "-5")]).await.is_err());
    }

    #[tokio::test]
    async fn test_correlation_id_from_extension() {
        let (mut parts, ()) = Request::builder().uri("/").body(()).unwrap().into_parts();
        parts.extensions.insert(CorrelationIdExt("abc".to_string()));
        let CorrelationId(id) = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(id, "abc");
    }
}
