//! Status classification: which responses become errors, and which errors.

use crate::error::{BoxError, FeignError};
use crate::response::{ERROR_BODY_PREVIEW_LIMIT, Response};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;

/// Turns selected responses into terminal errors.
#[async_trait]
pub trait StatusHandler: Send + Sync {
    /// Whether a response with `status` is an error for this handler.
    fn should_handle(&self, status: StatusCode) -> bool;

    /// Decode the response into the error delivered to the caller.
    async fn decode(&self, method_key: &str, response: Response) -> FeignError;
}

/// Handles every 4xx and 5xx as `FeignError::Status` with a body preview.
#[derive(Debug, Clone, Copy)]
pub struct DefaultStatusHandler {
    preview_limit: usize,
}

impl Default for DefaultStatusHandler {
    fn default() -> Self {
        Self {
            preview_limit: ERROR_BODY_PREVIEW_LIMIT,
        }
    }
}

impl DefaultStatusHandler {
    /// Handler whose preview is capped at `limit` bytes (never above 8 KiB).
    #[must_use]
    pub fn with_preview_limit(limit: usize) -> Self {
        Self {
            preview_limit: limit.min(ERROR_BODY_PREVIEW_LIMIT),
        }
    }
}

#[async_trait]
impl StatusHandler for DefaultStatusHandler {
    fn should_handle(&self, status: StatusCode) -> bool {
        status.is_client_error() || status.is_server_error()
    }

    async fn decode(&self, method_key: &str, response: Response) -> FeignError {
        let status = response.status();
        let content_type = response.content_type();
        let retry_after = response.retry_after();
        match response.preview(self.preview_limit).await {
            Ok(body_preview) => FeignError::Status {
                method_key: method_key.to_owned(),
                status,
                body_preview,
                content_type,
                retry_after,
            },
            Err(e) => e,
        }
    }
}

type Decoder = dyn Fn(&str, StatusCode, &HeaderMap, Bytes) -> BoxError + Send + Sync;

/// Predicate-selected handler with a caller-supplied domain decoder.
///
/// The decoder receives the body preview and returns the domain error, which
/// is delivered as `FeignError::Decoded`.
pub struct PredicateStatusHandler {
    predicate: Box<dyn Fn(StatusCode) -> bool + Send + Sync>,
    decoder: Box<Decoder>,
    preview_limit: usize,
}

impl PredicateStatusHandler {
    pub fn new<P, D>(predicate: P, decoder: D) -> Self
    where
        P: Fn(StatusCode) -> bool + Send + Sync + 'static,
        D: Fn(&str, StatusCode, &HeaderMap, Bytes) -> BoxError + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            decoder: Box::new(decoder),
            preview_limit: ERROR_BODY_PREVIEW_LIMIT,
        }
    }
}

#[async_trait]
impl StatusHandler for PredicateStatusHandler {
    fn should_handle(&self, status: StatusCode) -> bool {
        (self.predicate)(status)
    }

    async fn decode(&self, method_key: &str, response: Response) -> FeignError {
        let status = response.status();
        let headers = response.headers().clone();
        let retry_after = response.retry_after();
        let body = match response.bytes(self.preview_limit).await {
            Ok(body) => body,
            Err(FeignError::BodyTooLarge { .. }) => Bytes::new(),
            Err(e) => return e,
        };
        FeignError::Decoded {
            method_key: method_key.to_owned(),
            status,
            retry_after,
            source: (self.decoder)(method_key, status, &headers, body),
        }
    }
}

/// Tries handlers in order; the first whose predicate matches decodes.
#[derive(Clone, Default)]
pub struct CompositeStatusHandler {
    handlers: Vec<Arc<dyn StatusHandler>>,
}

impl CompositeStatusHandler {
    #[must_use]
    pub fn new(handlers: Vec<Arc<dyn StatusHandler>>) -> Self {
        Self { handlers }
    }

    #[must_use]
    pub fn then(mut self, handler: Arc<dyn StatusHandler>) -> Self {
        self.handlers.push(handler);
        self
    }
}

#[async_trait]
impl StatusHandler for CompositeStatusHandler {
    fn should_handle(&self, status: StatusCode) -> bool {
        self.handlers.iter().any(|h| h.should_handle(status))
    }

    async fn decode(&self, method_key: &str, response: Response) -> FeignError {
        let status = response.status();
        match self.handlers.iter().find(|h| h.should_handle(status)) {
            Some(handler) => handler.decode(method_key, response).await,
            None => DefaultStatusHandler::default().decode(method_key, response).await,
        }
    }
}
