use super::Call;
use crate::config::{Backoff, ExponentialBackoff, RetryConfig};
use crate::error::FeignError;
use crate::listener::{InvocationListener, Listeners};
use crate::response::Response;
use futures::future::BoxFuture;
use rand::Rng;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given delay, then re-invoke
    Retry(Duration),
    /// Budget spent: surface `FeignError::OutOfRetries`
    Exhausted,
    /// Re-raise the error as-is, without consulting any budget
    NotRetryable,
}

/// Decides whether and when a failed invocation is attempted again.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn next_delay(&self, error: &FeignError, attempt: u32) -> RetryDecision;
}

/// Bounded retries with a configured backoff.
///
/// A server `Retry-After` hint can only shorten the computed delay.
/// Construction errors are never retried.
#[derive(Debug, Clone)]
pub struct BasicRetryPolicy {
    max_retries: u32,
    backoff: Backoff,
}

impl BasicRetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.backoff.clone())
    }
}

impl RetryPolicy for BasicRetryPolicy {
    fn next_delay(&self, error: &FeignError, attempt: u32) -> RetryDecision {
        if error.is_construction() {
            return RetryDecision::NotRetryable;
        }
        if attempt > self.max_retries {
            return RetryDecision::Exhausted;
        }
        let backoff = match &self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay } => *delay,
            Backoff::Exponential(exp) => calculate_backoff(exp, attempt),
        };
        let delay = error.retry_after().map_or(backoff, |hint| hint.min(backoff));
        RetryDecision::Retry(delay)
    }
}

type ErrorPredicate = dyn Fn(&FeignError) -> bool + Send + Sync;

/// Wraps a policy and re-raises errors the predicate rejects immediately.
pub struct FilteredRetryPolicy<P> {
    inner: P,
    retryable: Box<ErrorPredicate>,
}

impl<P: RetryPolicy> FilteredRetryPolicy<P> {
    pub fn new<F>(inner: P, retryable: F) -> Self
    where
        F: Fn(&FeignError) -> bool + Send + Sync + 'static,
    {
        Self {
            inner,
            retryable: Box::new(retryable),
        }
    }

    /// Never retry client request errors (4xx except 408 and 429).
    pub fn excluding_client_errors(inner: P) -> Self {
        Self::new(inner, |err| !err.is_client_request_error())
    }
}

impl<P: RetryPolicy> RetryPolicy for FilteredRetryPolicy<P> {
    fn next_delay(&self, error: &FeignError, attempt: u32) -> RetryDecision {
        if (self.retryable)(error) {
            self.inner.next_delay(error, attempt)
        } else {
            RetryDecision::NotRetryable
        }
    }
}

/// Policy for a [`RetryConfig`].
///
/// An open circuit and an oversized body are re-raised at once; client request
/// errors too unless `retry_client_errors` is set.
pub(crate) fn policy_from_config(config: &RetryConfig) -> Arc<dyn RetryPolicy> {
    let basic = BasicRetryPolicy::from_config(config);
    let retry_client_errors = config.retry_client_errors;
    Arc::new(FilteredRetryPolicy::new(basic, move |err| {
        !err.is_circuit_open()
            && !matches!(err, FeignError::BodyTooLarge { .. })
            && (retry_client_errors || !err.is_client_request_error())
    }))
}

/// Tower layer re-invoking the inner stack on failure.
#[derive(Clone)]
pub struct RetryLayer {
    policy: Arc<dyn RetryPolicy>,
    listeners: Listeners,
}

impl RetryLayer {
    #[must_use]
    pub fn new(policy: Arc<dyn RetryPolicy>, listeners: Listeners) -> Self {
        Self { policy, listeners }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            policy: Arc::clone(&self.policy),
            listeners: self.listeners.clone(),
        }
    }
}

/// Service that retries failed calls.
///
/// Each retry re-sends the same [`Call`]; the inner stack re-expands the
/// request from the original arguments, so interceptors and server selection
/// run again.
#[derive(Clone)]
pub struct RetryService<S> {
    inner: S,
    policy: Arc<dyn RetryPolicy>,
    listeners: Listeners,
}

impl<S> Service<Call> for RetryService<S>
where
    S: Service<Call, Response = Response, Error = FeignError> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = FeignError;
    type Future = BoxFuture<'static, Result<Response, FeignError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call) -> Self::Future {
        // Swap so we consume the instance that was poll_ready'd,
        // leaving a fresh clone for the next poll_ready cycle.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let policy = Arc::clone(&self.policy);
        let listeners = self.listeners.clone();

        Box::pin(async move {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                let mut svc = inner.clone();
                let result = match svc.ready().await {
                    Ok(svc) => svc.call(call.clone()).await,
                    Err(err) => Err(err),
                };
                let err = match result {
                    Ok(response) => return Ok(response),
                    Err(err) => err,
                };

                match policy.next_delay(&err, attempt) {
                    RetryDecision::NotRetryable => return Err(err),
                    RetryDecision::Exhausted => {
                        tracing::debug!(
                            method = call.method_key(),
                            attempts = attempt,
                            error = %err,
                            "Retries exhausted"
                        );
                        return Err(FeignError::out_of_retries(attempt, err));
                    }
                    RetryDecision::Retry(delay) => {
                        tracing::debug!(
                            method = call.method_key(),
                            retry = attempt,
                            error = %err,
                            backoff_ms = delay.as_millis(),
                            "Retrying call after error"
                        );
                        listeners.retrying(call.method_key(), attempt, &err, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }
}

/// Calculate backoff duration for the 1-based `attempt`
///
/// Safely handles edge cases (NaN, infinity, negative values) to avoid panics.
#[must_use]
pub fn calculate_backoff(backoff: &ExponentialBackoff, attempt: u32) -> Duration {
    // Maximum safe backoff in seconds (1 day)
    const MAX_BACKOFF_SECS: f64 = 86400.0;

    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);

    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };

    let initial_secs = backoff.initial.as_secs_f64();
    let max_secs = backoff.max.as_secs_f64().min(MAX_BACKOFF_SECS);

    let base_duration = initial_secs * multiplier.powi(exponent);

    // Clamp to valid range for Duration::from_secs_f64 (must be finite, non-negative)
    let clamped = if base_duration.is_finite() {
        base_duration.min(max_secs).max(0.0)
    } else {
        max_secs
    };
    let duration = Duration::from_secs_f64(clamped);

    let duration = if backoff.jitter {
        let jitter_factor = rand::rng().random_range(0.0..=0.25);
        duration + duration.mul_f64(jitter_factor)
    } else {
        duration
    };

    // Keep jittered value within max
    duration.min(Duration::from_secs_f64(max_secs))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::descriptor::MethodDescriptor;
    use crate::error::TransportErrorKind;
    use crate::resolver::Target;
    use http::{Method, StatusCode};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn status_error(code: u16, retry_after: Option<Duration>) -> FeignError {
        FeignError::Status {
            method_key: "Api#get()".to_owned(),
            status: StatusCode::from_u16(code).unwrap(),
            body_preview: String::new(),
            content_type: None,
            retry_after,
        }
    }

    fn test_call() -> Call {
        let descriptor = MethodDescriptor::builder("Api#get()", Method::GET, "/")
            .build()
            .unwrap();
        Call::new(Arc::new(descriptor), vec![], Arc::new(Target::url("http://localhost")))
    }

    /// Fails with 503 until `failures` calls have been made.
    #[derive(Clone)]
    struct FlakyService {
        calls: Arc<AtomicU32>,
        failures: u32,
    }

    impl Service<Call> for FlakyService {
        type Response = Response;
        type Error = FeignError;
        type Future = BoxFuture<'static, Result<Response, FeignError>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _call: Call) -> Self::Future {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let failures = self.failures;
            Box::pin(async move {
                if n <= failures {
                    Err(status_error(503, None))
                } else {
                    Ok(Response::empty(StatusCode::OK))
                }
            })
        }
    }

    fn retry_service(failures: u32, max_retries: u32) -> (RetryService<FlakyService>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let inner = FlakyService {
            calls: Arc::clone(&calls),
            failures,
        };
        let policy = policy_from_config(&RetryConfig {
            max_retries,
            backoff: Backoff::None,
            retry_client_errors: false,
        });
        (RetryLayer::new(policy, Listeners::default()).layer(inner), calls)
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let (mut svc, calls) = retry_service(2, 3);
        let resp = svc.ready().await.unwrap().call(test_call()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let (mut svc, calls) = retry_service(10, 2);
        let err = svc.ready().await.unwrap().call(test_call()).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3, "1 initial + 2 retries");
        match err {
            FeignError::OutOfRetries { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
            }
            other => panic!("Expected OutOfRetries, got {other:?}"),
        }
    }

    #[test]
    fn test_retry_after_only_shortens_backoff() {
        let policy = BasicRetryPolicy::new(
            3,
            Backoff::Fixed {
                delay: Duration::from_secs(5),
            },
        );
        assert_eq!(
            policy.next_delay(&status_error(503, Some(Duration::from_secs(1))), 1),
            RetryDecision::Retry(Duration::from_secs(1))
        );
        assert_eq!(
            policy.next_delay(&status_error(503, Some(Duration::from_secs(60))), 1),
            RetryDecision::Retry(Duration::from_secs(5))
        );
        assert_eq!(
            policy.next_delay(&status_error(503, None), 4),
            RetryDecision::Exhausted
        );
    }

    #[test]
    fn test_filtered_policy_reraises_client_errors() {
        let policy = FilteredRetryPolicy::excluding_client_errors(BasicRetryPolicy::new(3, Backoff::None));
        assert_eq!(
            policy.next_delay(&status_error(400, None), 1),
            RetryDecision::NotRetryable
        );
        assert_eq!(
            policy.next_delay(&status_error(429, None), 1),
            RetryDecision::Retry(Duration::ZERO)
        );
        assert_eq!(
            policy.next_delay(
                &FeignError::transport(TransportErrorKind::Io, "reset"),
                1
            ),
            RetryDecision::Retry(Duration::ZERO)
        );
    }

    #[test]
    fn test_config_policy_reraises_open_circuit() {
        let policy = policy_from_config(&RetryConfig {
            max_retries: 3,
            backoff: Backoff::default(),
            retry_client_errors: true,
        });
        let open = FeignError::CircuitOpen {
            breaker_key: "Api#get()".to_owned(),
        };
        assert_eq!(policy.next_delay(&open, 1), RetryDecision::NotRetryable);
        assert_eq!(
            policy.next_delay(&FeignError::BodyTooLarge { limit: 4, actual: 8 }, 1),
            RetryDecision::NotRetryable
        );
        assert!(matches!(
            policy.next_delay(&status_error(400, None), 1),
            RetryDecision::Retry(_)
        ));
    }

    #[test]
    fn test_construction_errors_not_retried() {
        let policy = BasicRetryPolicy::new(3, Backoff::None);
        assert_eq!(
            policy.next_delay(&FeignError::Configuration("bad".to_owned()), 1),
            RetryDecision::NotRetryable
        );
    }

    #[test]
    fn test_calculate_backoff_exponential() {
        let backoff = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(calculate_backoff(&backoff, 1), Duration::from_millis(100));
        assert_eq!(calculate_backoff(&backoff, 2), Duration::from_millis(200));
        assert_eq!(calculate_backoff(&backoff, 3), Duration::from_millis(400));
        assert_eq!(calculate_backoff(&backoff, 10), Duration::from_secs(1));
    }

    #[test]
    fn test_calculate_backoff_sanitizes_input() {
        let backoff = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: f64::NAN,
            jitter: true,
        };
        for attempt in 1..5 {
            let d = calculate_backoff(&backoff, attempt);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(125));
        }
        assert_eq!(
            calculate_backoff(&ExponentialBackoff::fast(), u32::MAX),
            Duration::from_millis(100)
        );
    }
}
