use crate::error::{BoxError, FeignError};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use http::header::{HeaderName, HeaderValue};
use http::{Method, Uri};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Stream of body chunks flowing in either direction.
pub type BodyStream = BoxStream<'static, Result<Bytes, FeignError>>;

type StreamFactory = dyn Fn() -> BodyStream + Send + Sync;

/// Request body attached to a [`Request`].
///
/// Every variant except [`RequestBody::OneShot`] is cold: opening it again
/// re-emits the same content, which is what makes a request safe to retry.
#[derive(Clone, Default)]
#[non_exhaustive]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// A single pre-serialized element
    Bytes(Bytes),
    /// Pre-encoded `application/x-www-form-urlencoded` payload, passed through as-is
    Form(Bytes),
    /// Replayable stream: the factory is called once per attempt
    Stream(Arc<StreamFactory>),
    /// Stream that can be opened exactly once
    OneShot(Arc<Mutex<Option<BodyStream>>>),
}

impl RequestBody {
    /// Body from a cold stream factory.
    pub fn stream<F>(factory: F) -> Self
    where
        F: Fn() -> BodyStream + Send + Sync + 'static,
    {
        Self::Stream(Arc::new(factory))
    }

    /// Replayable stream over a fixed list of chunks.
    #[must_use]
    pub fn chunks(chunks: Vec<Bytes>) -> Self {
        let chunks: Arc<[Bytes]> = chunks.into();
        Self::stream(move || {
            let chunks = Arc::clone(&chunks);
            stream::iter((0..chunks.len()).map(move |i| Ok(chunks[i].clone()))).boxed()
        })
    }

    /// Body from a hot stream that can only be consumed once.
    ///
    /// A retry that needs to open it again fails with
    /// [`FeignError::BodyConsumed`] instead of sending a truncated body.
    #[must_use]
    pub fn one_shot(stream: BodyStream) -> Self {
        Self::OneShot(Arc::new(Mutex::new(Some(stream))))
    }

    /// Form body serialized with `serde_urlencoded`.
    ///
    /// # Errors
    /// Returns `FeignError::FormEncode` if the value cannot be encoded.
    pub fn form<T: serde::Serialize + ?Sized>(fields: &T) -> Result<Self, FeignError> {
        Ok(Self::Form(Bytes::from(serde_urlencoded::to_string(fields)?)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Size of a fully materialized body, `None` for streams.
    #[must_use]
    pub fn known_len(&self) -> Option<usize> {
        match self {
            Self::Empty => Some(0),
            Self::Bytes(b) | Self::Form(b) => Some(b.len()),
            Self::Stream(_) | Self::OneShot(_) => None,
        }
    }

    /// Open the body for one transmission.
    ///
    /// # Errors
    /// Returns `FeignError::BodyConsumed` when a one-shot body is opened twice.
    pub fn open(&self, method_key: &str) -> Result<BodyStream, FeignError> {
        match self {
            Self::Empty => Ok(stream::empty().boxed()),
            Self::Bytes(b) | Self::Form(b) => Ok(stream::once(futures::future::ready(Ok(b.clone()))).boxed()),
            Self::Stream(factory) => Ok(factory()),
            Self::OneShot(slot) => slot.lock().take().ok_or_else(|| FeignError::BodyConsumed {
                method_key: method_key.to_owned(),
            }),
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::Form(b) => write!(f, "Form({} bytes)", b.len()),
            Self::Stream(_) => f.write_str("Stream"),
            Self::OneShot(_) => f.write_str("OneShot"),
        }
    }
}

/// Header list that keeps names in first-declaration order.
///
/// Values for the same name are grouped under that name, in the order they
/// were appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(HeaderName, Vec<HeaderValue>)>,
}

impl HeaderList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any values already present for `name`.
    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Replace all values for `name`, keeping its position if present.
    pub fn set(&mut self, name: HeaderName, value: HeaderValue) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => *values = vec![value],
            None => self.entries.push((name, vec![value])),
        }
    }

    #[must_use]
    pub fn contains(&self, name: &HeaderName) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// First value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.get_all(name).first()
    }

    /// All values for `name`, empty if absent.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[HeaderValue] {
        self.entries
            .iter()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .map_or(&[], |(_, values)| values.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &[HeaderValue])> {
        self.entries.iter().map(|(n, v)| (n, v.as_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert to an `http::HeaderMap`, preserving order.
    #[must_use]
    pub fn to_header_map(&self) -> http::HeaderMap {
        let mut map = http::HeaderMap::with_capacity(self.entries.len());
        for (name, values) in &self.entries {
            for value in values {
                map.append(name.clone(), value.clone());
            }
        }
        map
    }
}

/// One fully resolved outgoing call.
///
/// A `Request` is never mutated in place. Interceptors and failover steps use
/// the `with_*` methods, which consume the value and return a new one.
#[derive(Debug, Clone)]
pub struct Request {
    method_key: Arc<str>,
    method: Method,
    uri: Uri,
    headers: HeaderList,
    body: RequestBody,
}

impl Request {
    #[must_use]
    pub fn new(
        method_key: Arc<str>,
        method: Method,
        uri: Uri,
        headers: HeaderList,
        body: RequestBody,
    ) -> Self {
        Self {
            method_key,
            method,
            uri,
            headers,
            body,
        }
    }

    /// Key of the declared method this request was expanded from.
    #[must_use]
    pub fn method_key(&self) -> &str {
        &self.method_key
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Derive a request with one more header value.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Derive a request with `name` set to exactly `value`.
    #[must_use]
    pub fn with_header_replaced(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Derive a request with a different URI.
    #[must_use]
    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.uri = uri;
        self
    }

    /// Convert into an `http::Request` carrying a freshly opened body.
    ///
    /// # Errors
    /// Returns `FeignError::BodyConsumed` if the body is one-shot and was already sent.
    pub fn to_http<B>(
        &self,
        body: impl FnOnce(BodyStream) -> B,
    ) -> Result<http::Request<B>, FeignError> {
        let stream = self.body.open(&self.method_key)?;
        let mut req = http::Request::new(body(stream));
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.uri.clone();
        *req.headers_mut() = self.headers.to_header_map();
        if let Some(len) = self.body.known_len().filter(|len| *len > 0) {
            req.headers_mut()
                .entry(http::header::CONTENT_LENGTH)
                .or_insert_with(|| HeaderValue::from(len));
        }
        Ok(req)
    }
}

/// Map a body stream error to the boxed error hyper expects.
pub(crate) fn into_box_error(err: FeignError) -> BoxError {
    Box::new(err)
}
