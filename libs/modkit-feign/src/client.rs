use crate::args::Arg;
use crate::builder::FeignClientBuilder;
use crate::error::FeignError;
use crate::handler::{MethodHandler, Reply};
use crate::request::BodyStream;
use crate::resolver::Target;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Declarative client: one [`MethodHandler`] per declared method.
///
/// Built once by [`FeignClientBuilder`] and immutable afterwards; clone it
/// freely to share between tasks.
#[derive(Clone)]
pub struct FeignClient {
    target: Arc<Target>,
    handlers: Arc<HashMap<String, MethodHandler>>,
}

impl FeignClient {
    /// Start configuring a client for `target`.
    #[must_use]
    pub fn builder(target: Target) -> FeignClientBuilder {
        FeignClientBuilder::new(target)
    }

    pub(crate) fn new(target: Arc<Target>, handlers: HashMap<String, MethodHandler>) -> Self {
        Self {
            target,
            handlers: Arc::new(handlers),
        }
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Handler of the method declared under `method_key`.
    #[must_use]
    pub fn handler(&self, method_key: &str) -> Option<&MethodHandler> {
        self.handlers.get(method_key)
    }

    /// Keys of all declared methods, in no particular order.
    pub fn method_keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Invoke a method by key, shaped by its declaration.
    ///
    /// # Errors
    /// Returns `FeignError::Configuration` for an unknown key, otherwise see
    /// [`MethodHandler::invoke`].
    pub async fn invoke(&self, method_key: &str, args: Vec<Arg>) -> Result<Reply, FeignError> {
        self.lookup(method_key)?.invoke(args).await
    }

    /// Invoke a single-valued method by key.
    ///
    /// # Errors
    /// Returns `FeignError::Configuration` for an unknown key, otherwise see
    /// [`MethodHandler::invoke_single`].
    pub async fn invoke_single(
        &self,
        method_key: &str,
        args: Vec<Arg>,
    ) -> Result<Option<Bytes>, FeignError> {
        self.lookup(method_key)?.invoke_single(args).await
    }

    /// Invoke a streaming method by key.
    ///
    /// # Errors
    /// Returns `FeignError::Configuration` for an unknown key.
    pub fn invoke_stream(&self, method_key: &str, args: Vec<Arg>) -> Result<BodyStream, FeignError> {
        Ok(self.lookup(method_key)?.invoke_stream(args))
    }

    fn lookup(&self, method_key: &str) -> Result<&MethodHandler, FeignError> {
        self.handlers.get(method_key).ok_or_else(|| {
            FeignError::Configuration(format!(
                "method '{method_key}' is not declared on client for {}",
                self.target
            ))
        })
    }
}

impl std::fmt::Debug for FeignClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&str> = self.method_keys().collect();
        keys.sort_unstable();
        f.debug_struct("FeignClient")
            .field("target", &self.target)
            .field("methods", &keys)
            .finish()
    }
}
