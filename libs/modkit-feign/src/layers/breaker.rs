use super::Call;
use crate::circuit::CircuitBreaker;
use crate::error::FeignError;
use crate::fallback::Fallback;
use crate::response::Response;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};

/// Tower layer guarding the inner stack with one circuit breaker.
#[derive(Clone)]
pub struct CircuitBreakerLayer {
    breaker: Arc<CircuitBreaker>,
    fallback: Option<Arc<dyn Fallback>>,
}

impl CircuitBreakerLayer {
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker>, fallback: Option<Arc<dyn Fallback>>) -> Self {
        Self { breaker, fallback }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            breaker: Arc::clone(&self.breaker),
            fallback: self.fallback.clone(),
        }
    }
}

/// Fails fast while the breaker is open and records outcomes otherwise.
///
/// Client request errors and construction errors are returned untouched:
/// they neither count as failures nor trigger the fallback. The optional
/// execution timeout cancels the inner call and counts as a failure.
#[derive(Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
    fallback: Option<Arc<dyn Fallback>>,
}

impl<S> Service<Call> for CircuitBreakerService<S>
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
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let breaker = Arc::clone(&self.breaker);
        let fallback = self.fallback.clone();

        Box::pin(async move {
            let permit = match breaker.try_acquire() {
                Ok(permit) => permit,
                Err(open) => {
                    tracing::debug!(method = call.method_key(), breaker = breaker.key(), "Circuit open, call rejected");
                    return recover(fallback.as_deref(), &call, open).await;
                }
            };

            let attempt = async {
                inner.ready().await?;
                inner.call(call.clone()).await
            };
            let result = match breaker.config().execution_timeout {
                Some(timeout) => run_with_timeout(attempt, call.method_key(), timeout).await,
                None => attempt.await,
            };

            match result {
                Ok(response) => {
                    permit.on_success();
                    Ok(response)
                }
                Err(err) if err.is_client_request_error() || err.is_construction() => {
                    permit.on_ignored();
                    Err(err)
                }
                Err(err) => {
                    permit.on_failure();
                    recover(fallback.as_deref(), &call, err).await
                }
            }
        })
    }
}

async fn run_with_timeout<F>(attempt: F, method_key: &str, timeout: Duration) -> Result<Response, FeignError>
where
    F: Future<Output = Result<Response, FeignError>>,
{
    tokio::time::timeout(timeout, attempt)
        .await
        .unwrap_or_else(|_| {
            Err(FeignError::ExecutionTimeout {
                method_key: method_key.to_owned(),
                timeout,
            })
        })
}

async fn recover(fallback: Option<&dyn Fallback>, call: &Call, cause: FeignError) -> Result<Response, FeignError> {
    match fallback {
        Some(fallback) => {
            tracing::debug!(method = call.method_key(), cause = %cause, "Invoking fallback");
            fallback.call(call.method_key(), call.args(), &cause).await
        }
        None => Err(cause),
    }
}
