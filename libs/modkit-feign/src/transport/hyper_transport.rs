use super::Transport;
use super::tls::build_https_connector;
use crate::config::TransportOptions;
use crate::error::{BoxError, FeignError, TransportErrorKind};
use crate::request::{Request, into_box_error};
use crate::response::Response;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::time::Duration;
use tower::ServiceExt;
use tower_http::decompression::{Decompression, DecompressionLayer};

/// Outgoing body: the request's chunk stream framed for hyper.
type HyperBody = UnsyncBoxBody<Bytes, BoxError>;

type HyperClient = Decompression<Client<HttpsConnector<HttpConnector>, HyperBody>>;

/// Pooled hyper client with rustls TLS.
///
/// Reads `connect_timeout`, `request_timeout`, `compression`, the pool
/// settings, `allow_insecure_http` and `tls_roots` from [`TransportOptions`].
/// `follow_redirects` and `proxy` are not supported and ignored.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    request_timeout: Option<Duration>,
    allow_insecure_http: bool,
}

impl HyperTransport {
    /// Build a transport from options.
    ///
    /// # Errors
    /// Returns `FeignError::Tls` if native roots are requested but none are usable.
    pub fn new(options: &TransportOptions) -> Result<Self, FeignError> {
        if options.allow_insecure_http {
            tracing::warn!(
                target: "modkit_feign::security",
                "insecure HTTP enabled; use only for testing with mock servers"
            );
        }
        if options.follow_redirects || options.proxy.is_some() {
            tracing::debug!("HyperTransport ignores follow_redirects and proxy options");
        }

        let connector = build_https_connector(options)?;

        let mut builder = Client::builder(TokioExecutor::new());
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle) = options.pool_idle_timeout {
            builder.pool_idle_timeout(idle);
        }
        let client = builder.build::<_, HyperBody>(connector);

        let decompression = DecompressionLayer::new()
            .gzip(options.compression)
            .br(options.compression)
            .deflate(options.compression);

        Ok(Self {
            client: tower::ServiceBuilder::new()
                .layer(decompression)
                .service(client),
            request_timeout: options.request_timeout,
            allow_insecure_http: options.allow_insecure_http,
        })
    }

    fn check_scheme(&self, request: &Request) -> Result<(), FeignError> {
        match request.uri().scheme_str() {
            Some("https") => Ok(()),
            Some("http") if self.allow_insecure_http => Ok(()),
            Some("http") => Err(FeignError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "plain HTTP requires allow_insecure_http".to_owned(),
            }),
            other => Err(FeignError::InvalidScheme {
                scheme: other.unwrap_or_default().to_owned(),
                reason: "only http and https are supported".to_owned(),
            }),
        }
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn execute(&self, request: &Request) -> Result<Response, FeignError> {
        self.check_scheme(request)?;

        let http_request: http::Request<HyperBody> = request.to_http(|stream| {
            let frames = stream.map_ok(Frame::data).map_err(into_box_error);
            BodyExt::boxed_unsync(StreamBody::new(frames))
        })?;

        let call: futures::future::BoxFuture<'static, _> =
            Box::pin(self.client.clone().oneshot(http_request));
        let result = match self.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| FeignError::Timeout(timeout))?,
            None => call.await,
        };
        let response = result.map_err(map_client_error)?;

        let (parts, body) = response.into_parts();
        let body = body
            .into_data_stream()
            .map_err(FeignError::Body)
            .boxed();
        Ok(Response::new(parts.status, parts.headers, body))
    }
}

fn map_client_error(err: hyper_util::client::legacy::Error) -> FeignError {
    let kind = if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Io
    };
    FeignError::transport(kind, err)
}
