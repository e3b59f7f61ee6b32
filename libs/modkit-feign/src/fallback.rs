//! Fallbacks invoked when the circuit breaker rejects or records a failure.

use crate::args::Arg;
use crate::error::FeignError;
use crate::resolver::Target;
use crate::response::Response;
use async_trait::async_trait;
use std::sync::Arc;

/// Alternate implementation of a client method.
///
/// Receives the original arguments and the failure that triggered it
/// (`FeignError::CircuitOpen` when the call never left the breaker). Its
/// result, success or error, is what the caller sees.
#[async_trait]
pub trait Fallback: Send + Sync {
    /// # Errors
    /// Whatever error the fallback chooses to surface.
    async fn call(
        &self,
        method_key: &str,
        args: &[Arg],
        cause: &FeignError,
    ) -> Result<Response, FeignError>;
}

#[async_trait]
impl<F> Fallback for F
where
    F: Fn(&str, &FeignError) -> Result<Response, FeignError> + Send + Sync,
{
    async fn call(
        &self,
        method_key: &str,
        _args: &[Arg],
        cause: &FeignError,
    ) -> Result<Response, FeignError> {
        self(method_key, cause)
    }
}

/// Creates the fallback for a target and method, if there is one.
///
/// Consulted once per method when the client is built.
pub trait FallbackFactory: Send + Sync {
    fn create(&self, target: &Target, method_key: &str) -> Option<Arc<dyn Fallback>>;
}

impl<F> FallbackFactory for F
where
    F: Fn(&Target, &str) -> Option<Arc<dyn Fallback>> + Send + Sync,
{
    fn create(&self, target: &Target, method_key: &str) -> Option<Arc<dyn Fallback>> {
        self(target, method_key)
    }
}

/// Same fallback for every method.
#[derive(Clone)]
pub struct StaticFallbackFactory {
    fallback: Arc<dyn Fallback>,
}

impl StaticFallbackFactory {
    #[must_use]
    pub fn new(fallback: Arc<dyn Fallback>) -> Self {
        Self { fallback }
    }
}

impl FallbackFactory for StaticFallbackFactory {
    fn create(&self, _target: &Target, _method_key: &str) -> Option<Arc<dyn Fallback>> {
        Some(Arc::clone(&self.fallback))
    }
}
