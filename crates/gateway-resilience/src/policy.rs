//! Resilience policy engine.
//!
//! Each service gets a policy made of four layers, outermost first:
//!
//! 1. overall timeout
//! 2. circuit breaker
//! 3. retry with backoff
//! 4. per-attempt timeout
//!
//! Layers are plain functions from [`Attempt`] to [`Attempt`], applied innermost first.
//! Because the breaker sits outside the retry loop, one request counts as at most one
//! breaker failure no matter how many attempts it made.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::registry::BreakerRegistry;
use crate::retry::{with_retry, RetryPolicy};
use crate::timeout::{with_attempt_timeout, with_overall_timeout};
use futures::future::BoxFuture;
use futures::FutureExt;
use gateway_config::{GatewayConfig, ResiliencePolicyConfig, DEFAULT_POLICY};
use gateway_core::{BackendResponse, GatewayError, GatewayResult};
use gateway_telemetry::{MetricsSink, NoopMetrics};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of one backend call
pub type AttemptResult = GatewayResult<BackendResponse>;

/// A repeatable backend call
pub type Attempt = Arc<dyn Fn() -> BoxFuture<'static, AttemptResult> + Send + Sync>;

type Layer = Box<dyn FnOnce(Attempt) -> Attempt + Send>;

/// Statuses the breaker treats as backend failures
const BREAKER_FAILURE_STATUSES: [u16; 4] = [500, 502, 503, 504];

enum Verdict {
    Healthy,
    Failed,
    Inconclusive,
}

fn verdict(outcome: &AttemptResult) -> Verdict {
    match outcome {
        Ok(response) if BREAKER_FAILURE_STATUSES.contains(&response.status) => Verdict::Failed,
        Ok(_) => Verdict::Healthy,
        Err(err) if err.trips_breaker() => Verdict::Failed,
        Err(_) => Verdict::Inconclusive,
    }
}

/// Guard `inner` with a circuit breaker. Rejected calls never reach `inner`.
#[must_use]
pub fn with_circuit_breaker(
    inner: Attempt,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<dyn MetricsSink>,
) -> Attempt {
    Arc::new(move || {
        let inner = Arc::clone(&inner);
        let breaker = Arc::clone(&breaker);
        let metrics = Arc::clone(&metrics);
        async move {
            let permit = match breaker.acquire() {
                Ok(permit) => permit,
                Err(err) => {
                    metrics.record_circuit_rejection(breaker.service());
                    return Err(err);
                }
            };

            let outcome = inner().await;
            match verdict(&outcome) {
                Verdict::Healthy => permit.success(),
                Verdict::Failed => permit.failure(),
                Verdict::Inconclusive => permit.release(),
            }
            metrics.record_circuit_state(breaker.service(), breaker.state().as_gauge());
            outcome
        }
        .boxed()
    })
}

/// Builds and runs the per-service resilience wrap
pub struct ResiliencePolicyEngine {
    policies: HashMap<String, Arc<ResiliencePolicyConfig>>,
    default_policy: Arc<ResiliencePolicyConfig>,
    breakers: BreakerRegistry,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for ResiliencePolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResiliencePolicyEngine")
            .field("policies", &self.policies.keys().collect::<Vec<_>>())
            .field("breakers", &self.breakers.len())
            .finish_non_exhaustive()
    }
}

impl ResiliencePolicyEngine {
    /// Create an engine from named policies
    ///
    /// # Errors
    /// Returns a configuration error if no `"default"` policy is present
    pub fn new(policies: HashMap<String, ResiliencePolicyConfig>) -> GatewayResult<Self> {
        let policies: HashMap<String, Arc<ResiliencePolicyConfig>> = policies
            .into_iter()
            .map(|(name, policy)| (name.to_lowercase(), Arc::new(policy)))
            .collect();
        let default_policy = policies.get(DEFAULT_POLICY).cloned().ok_or_else(|| {
            GatewayError::configuration(format!("resilience policy '{DEFAULT_POLICY}' is required"))
        })?;

        Ok(Self {
            policies,
            default_policy,
            breakers: BreakerRegistry::new(),
            metrics: Arc::new(NoopMetrics),
        })
    }

    /// Create an engine with a breaker registered for every configured service
    ///
    /// # Errors
    /// Returns a configuration error if no `"default"` policy is present
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let engine = Self::new(config.resilience.clone())?;
        for service in &config.services {
            engine.breaker(&service.name);
        }
        info!(
            policies = engine.policies.len(),
            breakers = engine.breakers.len(),
            "Resilience engine initialized"
        );
        Ok(engine)
    }

    /// Attach a metrics sink
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Policy for a service, falling back to `"default"`
    #[must_use]
    pub fn config_for_service(&self, service: &str) -> Arc<ResiliencePolicyConfig> {
        self.policies
            .get(&service.to_lowercase())
            .map_or_else(|| Arc::clone(&self.default_policy), Arc::clone)
    }

    /// Breaker of a service, created on first use
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create(service, || {
            let policy = self.config_for_service(service);
            CircuitBreakerConfig {
                failure_threshold: policy.circuit_breaker_threshold,
                open_duration: policy.circuit_breaker_open_duration,
            }
        })
    }

    /// All breakers
    #[must_use]
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Wrap a single-call attempt in the service's policy
    #[must_use]
    pub fn build(&self, service: &str, attempt: Attempt) -> Attempt {
        let policy = self.config_for_service(service);
        let name: Arc<str> = Arc::from(service);
        let breaker = self.breaker(service);
        let retry = Arc::new(RetryPolicy::from_config(&policy));
        let metrics = Arc::clone(&self.metrics);

        let layers: Vec<Layer> = vec![
            Box::new({
                let name = Arc::clone(&name);
                let budget = policy.timeout_per_attempt;
                move |inner| with_attempt_timeout(inner, budget, name)
            }),
            Box::new({
                let name = Arc::clone(&name);
                let metrics = Arc::clone(&metrics);
                move |inner| with_retry(inner, retry, name, metrics)
            }),
            Box::new(move |inner| with_circuit_breaker(inner, breaker, metrics)),
            Box::new({
                let budget = policy.overall_timeout;
                move |inner| with_overall_timeout(inner, budget, name)
            }),
        ];

        layers.into_iter().fold(attempt, |wrapped, layer| layer(wrapped))
    }

    /// Run `attempt_fn` under the service's policy
    ///
    /// `attempt_fn` must perform exactly one backend call per invocation.
    ///
    /// # Errors
    /// Returns the terminal error of the policy: overall timeout, open circuit, or the
    /// last attempt's error once retries are exhausted
    pub async fn execute<F, Fut>(&self, service: &str, attempt_fn: F) -> AttemptResult
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AttemptResult> + Send + 'static,
    {
        let attempt: Attempt = Arc::new(move || attempt_fn().boxed());
        let outcome = self.build(service, attempt)().await;
        debug!(
            service,
            ok = outcome.is_ok(),
            status = outcome.as_ref().ok().map(|r| r.status),
            "Resilience policy completed"
        );
        outcome
    }
}
