use super::Call;
use crate::descriptor::ReturnShape;
use crate::error::FeignError;
use crate::expander::expand;
use crate::interceptor::RequestInterceptor;
use crate::listener::{InvocationListener, Listeners};
use crate::resolver::Target;
use crate::response::Response;
use crate::status::StatusHandler;
use crate::transport::Transport;
use futures::future::BoxFuture;
use http::StatusCode;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::Instant;
use tower::Service;

/// Collaborators shared by every method of one client.
pub(crate) struct ExecuteShared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) interceptors: Vec<Arc<dyn RequestInterceptor>>,
    pub(crate) listeners: Listeners,
    pub(crate) status_handler: Arc<dyn StatusHandler>,
    pub(crate) decode404: bool,
    pub(crate) max_body_size: usize,
}

/// Innermost service: one attempt, from template to classified response.
///
/// Per attempt it expands the template against the selected base URL, runs
/// the interceptors, sends the request, and turns handled statuses into
/// errors. With `decode404` a 404 becomes an empty success; no other status
/// is affected by that flag.
///
/// For single-valued methods the body is aggregated here, under
/// `max_body_size`, so a failure while reading it fails the attempt. Streaming
/// methods get the body back unread.
#[derive(Clone)]
pub struct ExecuteService {
    shared: Arc<ExecuteShared>,
}

impl ExecuteService {
    pub(crate) fn new(shared: Arc<ExecuteShared>) -> Self {
        Self { shared }
    }
}

impl Service<Call> for ExecuteService {
    type Response = Response;
    type Error = FeignError;
    type Future = BoxFuture<'static, Result<Response, FeignError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: Call) -> Self::Future {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move { shared.execute(call).await })
    }
}

impl ExecuteShared {
    async fn execute(&self, call: Call) -> Result<Response, FeignError> {
        let base_url = match (call.server(), call.target()) {
            (Some(server), _) => server.base_url(),
            (None, Target::Url(url)) => url.clone(),
            (None, Target::Service(name)) => {
                return Err(FeignError::Configuration(format!(
                    "{}: no server selected for service '{name}'",
                    call.method_key()
                )));
            }
        };

        let mut request = expand(call.descriptor(), call.args(), &base_url)?;
        for interceptor in &self.interceptors {
            request = interceptor.apply(request)?;
        }
        let request = Arc::new(request);

        self.listeners.request_started(&request);
        let started = Instant::now();
        let response = self.transport.execute(&request).await?;
        self.listeners.response_received(
            &request,
            response.status(),
            response.headers(),
            started.elapsed(),
        );
        let response = response.with_request(request);

        let status = response.status();
        if self.decode404 && status == StatusCode::NOT_FOUND {
            return Ok(Response::empty(StatusCode::NOT_FOUND));
        }
        if self.status_handler.should_handle(status) {
            return Err(self.status_handler.decode(call.method_key(), response).await);
        }
        if *call.descriptor().return_shape() == ReturnShape::Stream {
            return Ok(response);
        }
        aggregate(response, self.max_body_size).await
    }
}

async fn aggregate(response: Response, limit: usize) -> Result<Response, FeignError> {
    let status = response.status();
    let headers = response.headers().clone();
    let request = response.request_arc();
    let body = response.bytes(limit).await?;

    let elements = if body.is_empty() { Vec::new() } else { vec![body] };
    let aggregated = Response::from_elements(status, elements).with_headers(headers);
    Ok(match request {
        Some(request) => aggregated.with_request(request),
        None => aggregated,
    })
}
