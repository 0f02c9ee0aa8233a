//! Timeout layers.
//!
//! Both layers rely on `tokio::time::timeout`, which drops the inner future when the
//! budget runs out. Dropping cancels whatever the attempt was doing, in-flight HTTP
//! call and pending retry sleep included.

use crate::policy::Attempt;
use futures::FutureExt;
use gateway_core::{GatewayError, GatewayResult, TimeoutScope};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Run a future under a budget, mapping expiry to `BackendTimeout`
///
/// # Errors
/// Returns `GatewayError::BackendTimeout` with the given scope if the budget is exceeded,
/// otherwise whatever the future returned
pub async fn run_with_timeout<F, T>(
    future: F,
    budget: Duration,
    service: &str,
    scope: TimeoutScope,
) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(budget, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                service,
                timeout_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                scope = %scope,
                "Backend call timed out"
            );
            Err(GatewayError::timeout(service, budget, scope))
        }
    }
}

/// Bound a single backend attempt
#[must_use]
pub fn with_attempt_timeout(inner: Attempt, budget: Duration, service: Arc<str>) -> Attempt {
    with_scope(inner, budget, service, TimeoutScope::Attempt)
}

/// Bound the whole operation, retries and backoff included
#[must_use]
pub fn with_overall_timeout(inner: Attempt, budget: Duration, service: Arc<str>) -> Attempt {
    with_scope(inner, budget, service, TimeoutScope::Overall)
}

fn with_scope(inner: Attempt, budget: Duration, service: Arc<str>, scope: TimeoutScope) -> Attempt {
    Arc::new(move || {
        let call = inner();
        let service = Arc::clone(&service);
        async move { run_with_timeout(call, budget, &service, scope).await }.boxed()
    })
}
