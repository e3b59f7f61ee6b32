#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

//! Shared fixtures: an in-memory transport driven by a script, and a
//! listener recording every hook call.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use http::{HeaderMap, StatusCode};
use modkit_feign::{
    FeignError, InvocationListener, Request, Response, Transport, TransportErrorKind,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Responder = dyn Fn(&Request, usize) -> Result<Response, FeignError> + Send + Sync;

/// Transport answering from a closure and recording what it was sent.
///
/// The closure receives the request and the 0-based index of the exchange.
pub struct ScriptedTransport {
    responder: Box<Responder>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Seen>>,
}

/// One recorded exchange.
#[derive(Debug, Clone)]
pub struct Seen {
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

impl Seen {
    pub fn header(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

impl ScriptedTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&Request, usize) -> Result<Response, FeignError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Always answer `status` with `body`.
    pub fn always(status: u16, body: &'static str) -> Arc<Self> {
        Self::new(move |_, _| Ok(reply(status, body)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    pub fn uris(&self) -> Vec<String> {
        self.seen.lock().iter().map(|s| s.uri.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &Request) -> Result<Response, FeignError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(Seen {
            uri: request.uri().to_string(),
            headers: request
                .headers()
                .iter()
                .flat_map(|(name, values)| {
                    values
                        .iter()
                        .map(move |v| (name.to_string(), v.to_str().unwrap_or_default().to_owned()))
                })
                .collect(),
        });
        (self.responder)(request, index)
    }
}

pub fn reply(status: u16, body: &'static str) -> Response {
    let elements = if body.is_empty() {
        Vec::new()
    } else {
        vec![Bytes::from_static(body.as_bytes())]
    };
    Response::from_elements(StatusCode::from_u16(status).unwrap(), elements)
}

pub fn reply_with_headers(status: u16, body: &'static str, headers: &[(&'static str, &'static str)]) -> Response {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(*name, value.parse().unwrap());
    }
    reply(status, body).with_headers(map)
}

/// 200 whose body yields `prefix` and then breaks off mid-read.
pub fn broken_body(prefix: &'static str) -> Response {
    let chunks = vec![
        Ok(Bytes::from_static(prefix.as_bytes())),
        Err(FeignError::Body("connection reset".into())),
    ];
    Response::new(StatusCode::OK, HeaderMap::new(), stream::iter(chunks).boxed())
}

/// 200 whose single body chunk arrives after `delay`.
pub fn slow_body(delay: Duration, body: &'static str) -> Response {
    let chunk = async move {
        tokio::time::sleep(delay).await;
        Ok::<_, FeignError>(Bytes::from_static(body.as_bytes()))
    };
    Response::new(StatusCode::OK, HeaderMap::new(), stream::once(chunk).boxed())
}

pub fn connect_refused() -> FeignError {
    FeignError::transport(TransportErrorKind::Connect, "connection refused")
}

/// Listener writing one line per hook call.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

impl InvocationListener for RecordingListener {
    fn request_started(&self, request: &Request) {
        self.events.lock().push(format!("request:{}", request.uri()));
    }

    fn response_received(&self, _request: &Request, status: StatusCode, _headers: &HeaderMap, _elapsed: Duration) {
        self.events.lock().push(format!("response:{}", status.as_u16()));
    }

    fn body_element(&self, _method_key: &str, element: &Bytes) {
        self.events
            .lock()
            .push(format!("element:{}", String::from_utf8_lossy(element)));
    }

    fn error_received(&self, method_key: &str, _error: &FeignError, _elapsed: Duration) {
        self.events.lock().push(format!("error:{method_key}"));
    }

    fn retrying(&self, _method_key: &str, attempt: u32, _error: &FeignError, _delay: Duration) {
        self.events.lock().push(format!("retry:{attempt}"));
    }
}
