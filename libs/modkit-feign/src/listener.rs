//! Instrumentation hooks.
//!
//! Listeners observe values passing through the pipeline. They cannot alter
//! control flow: every hook takes shared references and returns nothing.

use crate::error::FeignError;
use crate::request::Request;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Verbosity of [`TracingListener`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Nothing is logged
    None,
    /// Verb, URI, status and elapsed time
    #[default]
    Basic,
    /// `Basic` plus request and response headers
    Headers,
    /// `Headers` plus body sizes and one event per stream element
    Full,
}

/// Side-effect-only hooks called by the invocation pipeline.
///
/// All methods default to no-ops; implement the ones you need.
pub trait InvocationListener: Send + Sync {
    /// Called once per attempt, after interceptors and before any network activity.
    fn request_started(&self, request: &Request) {
        let _ = request;
    }

    /// Called when response headers arrive for an attempt.
    fn response_received(
        &self,
        request: &Request,
        status: StatusCode,
        headers: &HeaderMap,
        elapsed: Duration,
    ) {
        let _ = (request, status, headers, elapsed);
    }

    /// Called for every body element handed to the caller.
    ///
    /// Elements the caller never receives (after cancellation) are not reported.
    fn body_element(&self, method_key: &str, element: &Bytes) {
        let _ = (method_key, element);
    }

    /// Called once with the terminal error of an invocation.
    fn error_received(&self, method_key: &str, error: &FeignError, elapsed: Duration) {
        let _ = (method_key, error, elapsed);
    }

    /// Called before the retry decorator sleeps and re-invokes.
    fn retrying(&self, method_key: &str, attempt: u32, error: &FeignError, delay: Duration) {
        let _ = (method_key, attempt, error, delay);
    }
}

/// Ordered fan-out over registered listeners.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<[Arc<dyn InvocationListener>]>,
}

impl Listeners {
    #[must_use]
    pub fn new(listeners: Vec<Arc<dyn InvocationListener>>) -> Self {
        Self {
            inner: listeners.into(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl InvocationListener for Listeners {
    fn request_started(&self, request: &Request) {
        for l in self.inner.iter() {
            l.request_started(request);
        }
    }

    fn response_received(
        &self,
        request: &Request,
        status: StatusCode,
        headers: &HeaderMap,
        elapsed: Duration,
    ) {
        for l in self.inner.iter() {
            l.response_received(request, status, headers, elapsed);
        }
    }

    fn body_element(&self, method_key: &str, element: &Bytes) {
        for l in self.inner.iter() {
            l.body_element(method_key, element);
        }
    }

    fn error_received(&self, method_key: &str, error: &FeignError, elapsed: Duration) {
        for l in self.inner.iter() {
            l.error_received(method_key, error, elapsed);
        }
    }

    fn retrying(&self, method_key: &str, attempt: u32, error: &FeignError, delay: Duration) {
        for l in self.inner.iter() {
            l.retrying(method_key, attempt, error, delay);
        }
    }
}

/// Listener that writes pipeline events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener {
    level: LogLevel,
}

impl TracingListener {
    #[must_use]
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    #[must_use]
    pub fn level(&self) -> LogLevel {
        self.level
    }
}

impl InvocationListener for TracingListener {
    fn request_started(&self, request: &Request) {
        match self.level {
            LogLevel::None => {}
            LogLevel::Basic => tracing::debug!(
                method_key = request.method_key(),
                method = %request.method(),
                uri = %request.uri(),
                "Request started"
            ),
            LogLevel::Headers | LogLevel::Full => tracing::debug!(
                method_key = request.method_key(),
                method = %request.method(),
                uri = %request.uri(),
                headers = ?request.headers(),
                body_len = ?request.body().known_len(),
                "Request started"
            ),
        }
    }

    fn response_received(
        &self,
        request: &Request,
        status: StatusCode,
        headers: &HeaderMap,
        elapsed: Duration,
    ) {
        match self.level {
            LogLevel::None => {}
            LogLevel::Basic => tracing::debug!(
                method_key = request.method_key(),
                status = status.as_u16(),
                elapsed_ms = elapsed.as_millis(),
                "Response received"
            ),
            LogLevel::Headers | LogLevel::Full => tracing::debug!(
                method_key = request.method_key(),
                status = status.as_u16(),
                elapsed_ms = elapsed.as_millis(),
                headers = ?headers,
                "Response received"
            ),
        }
    }

    fn body_element(&self, method_key: &str, element: &Bytes) {
        if self.level == LogLevel::Full {
            tracing::trace!(method_key, len = element.len(), "Body element received");
        }
    }

    fn error_received(&self, method_key: &str, error: &FeignError, elapsed: Duration) {
        if self.level != LogLevel::None {
            tracing::debug!(
                method_key,
                error = %error,
                elapsed_ms = elapsed.as_millis(),
                "Invocation failed"
            );
        }
    }

    fn retrying(&self, method_key: &str, attempt: u32, error: &FeignError, delay: Duration) {
        if self.level != LogLevel::None {
            tracing::debug!(
                method_key,
                retry = attempt,
                error = %error,
                backoff_ms = delay.as_millis(),
                "Retrying invocation"
            );
        }
    }
}
