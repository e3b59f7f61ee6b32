//! Per-method entry point adapting the pipeline to the declared return shape.

use crate::args::Arg;
use crate::codec;
use crate::descriptor::{MethodDescriptor, ReturnShape};
use crate::error::FeignError;
use crate::layers::{Call, PipelineService};
use crate::listener::{InvocationListener, Listeners};
use crate::request::BodyStream;
use crate::resolver::Target;
use crate::response::Response;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::time::Instant;
use tower::{Service, ServiceExt};

/// Result of [`MethodHandler::invoke`], shaped by the method's declaration.
pub enum Reply {
    /// Zero or one element; `None` when the body was empty
    Single(Option<Bytes>),
    /// Lazy element stream; nothing is sent until it is first polled
    Stream(BodyStream),
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(body) => f.debug_tuple("Single").field(body).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Invokes one declared method through its pipeline.
///
/// Cheap to clone. Each invocation builds a fresh [`Call`] and runs the
/// composed stack; nothing is shared between concurrent invocations except
/// the stack's own state (breakers, resolver cursors).
#[derive(Clone)]
pub struct MethodHandler {
    descriptor: Arc<MethodDescriptor>,
    target: Arc<Target>,
    service: PipelineService,
    listeners: Listeners,
    max_body_size: usize,
}

impl MethodHandler {
    pub(crate) fn new(
        descriptor: Arc<MethodDescriptor>,
        target: Arc<Target>,
        service: PipelineService,
        listeners: Listeners,
        max_body_size: usize,
    ) -> Self {
        Self {
            descriptor,
            target,
            service,
            listeners,
            max_body_size,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn method_key(&self) -> &str {
        self.descriptor.key()
    }

    /// Dispatch on the declared return shape.
    ///
    /// # Errors
    /// For single-valued methods, the terminal error of the invocation.
    /// Streaming methods never fail here; errors arrive through the stream.
    pub async fn invoke(&self, args: Vec<Arg>) -> Result<Reply, FeignError> {
        match self.descriptor.return_shape() {
            ReturnShape::Stream => Ok(Reply::Stream(self.invoke_stream(args))),
            _ => self.invoke_single(args).await.map(Reply::Single),
        }
    }

    /// Run the pipeline and return the response.
    ///
    /// Single-valued methods get the body already aggregated by the pipeline;
    /// streaming methods get it unread.
    ///
    /// # Errors
    /// Returns the terminal error after all decorators gave up.
    pub async fn execute(&self, args: Vec<Arg>) -> Result<Response, FeignError> {
        let started = Instant::now();
        let result = self.dispatch(args).await;
        if let Err(err) = &result {
            self.listeners
                .error_received(self.method_key(), err, started.elapsed());
        }
        result
    }

    /// Run the pipeline and aggregate the body into at most one element.
    ///
    /// # Errors
    /// Returns the terminal error, or `FeignError::BodyTooLarge` when the body
    /// exceeds `max_body_size`.
    pub async fn invoke_single(&self, args: Vec<Arg>) -> Result<Option<Bytes>, FeignError> {
        let started = Instant::now();
        let result = self.single(args).await;
        if let Err(err) = &result {
            self.listeners
                .error_received(self.method_key(), err, started.elapsed());
        }
        result
    }

    // The pipeline has already read the body for single-valued methods; the
    // limit still applies to fallback responses.
    async fn single(&self, args: Vec<Arg>) -> Result<Option<Bytes>, FeignError> {
        let response = self.dispatch(args).await?;
        let body = response.bytes(self.max_body_size).await?;
        if body.is_empty() {
            return Ok(None);
        }
        self.listeners.body_element(self.method_key(), &body);
        Ok(Some(body))
    }

    /// Lazy stream of body elements.
    ///
    /// The invocation starts on first poll. Dropping the stream cancels
    /// whatever is in flight, including pending retry sleeps.
    #[must_use]
    pub fn invoke_stream(&self, args: Vec<Arg>) -> BodyStream {
        let handler = self.clone();
        let body = stream::once(async move {
            match handler.dispatch(args).await {
                Ok(response) => response.into_body(),
                Err(err) => stream::once(futures::future::ready(Err(err))).boxed(),
            }
        })
        .flatten();

        Observed {
            inner: body,
            listeners: self.listeners.clone(),
            method_key: Arc::clone(&self.descriptor.key),
            started: None,
            done: false,
        }
        .boxed()
    }

    /// Single JSON value, `None` for an empty body.
    ///
    /// # Errors
    /// Invocation errors as in [`MethodHandler::invoke_single`], or
    /// `FeignError::Json` if the body does not decode.
    pub async fn invoke_json<T: DeserializeOwned>(&self, args: Vec<Arg>) -> Result<Option<T>, FeignError> {
        self.invoke_single(args)
            .await?
            .map(|body| codec::decode_json(&body))
            .transpose()
    }

    /// Newline-delimited JSON values, decoded as they arrive.
    #[must_use]
    pub fn invoke_ndjson<T>(&self, args: Vec<Arg>) -> BoxStream<'static, Result<T, FeignError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        codec::ndjson(self.invoke_stream(args))
    }

    async fn dispatch(&self, args: Vec<Arg>) -> Result<Response, FeignError> {
        let call = Call::new(Arc::clone(&self.descriptor), args, Arc::clone(&self.target));
        let mut service = self.service.clone();
        service.ready().await?.call(call).await
    }
}

pin_project! {
    /// Reports delivered elements and the terminal error to the listeners.
    struct Observed<S> {
        #[pin]
        inner: S,
        listeners: Listeners,
        method_key: Arc<str>,
        started: Option<Instant>,
        done: bool,
    }
}

impl<S> Stream for Observed<S>
where
    S: Stream<Item = Result<Bytes, FeignError>>,
{
    type Item = Result<Bytes, FeignError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        let started = *this.started.get_or_insert_with(Instant::now);

        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(element)) => {
                this.listeners.body_element(this.method_key, &element);
                Poll::Ready(Some(Ok(element)))
            }
            Some(Err(err)) => {
                *this.done = true;
                this.listeners
                    .error_received(this.method_key, &err, started.elapsed());
                Poll::Ready(Some(Err(err)))
            }
            None => {
                *this.done = true;
                Poll::Ready(None)
            }
        }
    }
}
