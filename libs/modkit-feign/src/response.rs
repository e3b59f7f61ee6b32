use crate::error::FeignError;
use crate::request::{BodyStream, Request};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Maximum bytes of an error body kept in `FeignError::Status::body_preview` (8 KiB)
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Parse `Retry-After` header value into a `Duration`.
///
/// Supports two formats per RFC 7231:
/// - Seconds: "120" → 120 seconds
/// - HTTP-date (RFC 1123): "Wed, 21 Oct 2015 07:28:00 GMT" → duration until that time
///
/// Returns `None` if the header is missing, unparsable, negative, or in the past.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds.cast_unsigned()));
    }

    let parsed = httpdate::parse_http_date(trimmed).ok()?;
    parsed.duration_since(SystemTime::now()).ok()
}

/// One received reply.
///
/// The body is a lazy chunk stream that can be consumed exactly once.
/// Responses synthesized by the pipeline (404-as-empty, fallbacks) carry no
/// originating request.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: BodyStream,
    request: Option<Arc<Request>>,
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self {
            status,
            headers,
            body,
            request: None,
        }
    }

    /// Response whose body emits the given elements in order.
    #[must_use]
    pub fn from_elements(status: StatusCode, elements: Vec<Bytes>) -> Self {
        Self::new(
            status,
            HeaderMap::new(),
            stream::iter(elements.into_iter().map(Ok)).boxed(),
        )
    }

    /// Response with no body.
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), stream::empty().boxed())
    }

    /// Attach the request this response answers.
    #[must_use]
    pub fn with_request(mut self, request: Arc<Request>) -> Self {
        self.request = Some(request);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request that produced this response, if it came from a transport.
    #[must_use]
    pub fn request(&self) -> Option<&Request> {
        self.request.as_deref()
    }

    pub(crate) fn request_arc(&self) -> Option<Arc<Request>> {
        self.request.clone()
    }

    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(&self.headers)
    }

    /// Consume the response and return its body stream.
    #[must_use]
    pub fn into_body(self) -> BodyStream {
        self.body
    }

    /// Aggregate the body, failing once it grows past `limit` bytes.
    ///
    /// # Errors
    /// Returns `FeignError::BodyTooLarge` if the limit is exceeded, or the
    /// body stream's own error.
    pub async fn bytes(self, limit: usize) -> Result<Bytes, FeignError> {
        read_body_limited(self.body, limit).await
    }

    /// Read at most `limit` bytes of the body as lossy UTF-8 for diagnostics.
    ///
    /// # Errors
    /// Propagates body stream errors other than the size limit.
    pub async fn preview(self, limit: usize) -> Result<String, FeignError> {
        match read_body_limited(self.body, limit).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(FeignError::BodyTooLarge { .. }) => Ok("<body too large for preview>".to_owned()),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("request", &self.request.as_ref().map(|r| r.uri()))
            .finish_non_exhaustive()
    }
}

/// Collect a body stream into one buffer, enforcing `limit`.
pub(crate) async fn read_body_limited(mut body: BodyStream, limit: usize) -> Result<Bytes, FeignError> {
    let mut collected = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if collected.len() + chunk.len() > limit {
            return Err(FeignError::BodyTooLarge {
                limit,
                actual: collected.len() + chunk.len(),
            });
        }
        collected.extend_from_slice(&chunk);
    }
    Ok(collected.freeze())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, "  120 ".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_rejects_garbage_and_negative() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(http::header::RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(http::header::RETRY_AFTER, "-5".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(parse_retry_after(&headers), None, "past dates carry no hint");

        let future = httpdate::fmt_http_date(SystemTime::now() + Duration::from_secs(60));
        headers.insert(http::header::RETRY_AFTER, future.parse().unwrap());
        let hint = parse_retry_after(&headers).unwrap();
        assert!(hint.as_secs() >= 58 && hint.as_secs() <= 60);
    }

    #[tokio::test]
    async fn test_bytes_aggregates_elements() {
        let resp = Response::from_elements(
            StatusCode::OK,
            vec![Bytes::from_static(b"he"), Bytes::from_static(b"llo")],
        );
        assert_eq!(resp.bytes(1024).await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_bytes_enforces_limit() {
        let resp = Response::from_elements(
            StatusCode::OK,
            vec![Bytes::from_static(b"1234"), Bytes::from_static(b"5678")],
        );
        let err = resp.bytes(6).await.unwrap_err();
        assert!(matches!(err, FeignError::BodyTooLarge { limit: 6, actual: 8 }));
    }

    #[tokio::test]
    async fn test_preview_degrades_on_large_body() {
        let resp = Response::from_elements(StatusCode::BAD_GATEWAY, vec![Bytes::from(vec![b'x'; 64])]);
        assert_eq!(resp.preview(16).await.unwrap(), "<body too large for preview>");
    }

    #[test]
    fn test_synthetic_response_has_no_request() {
        let resp = Response::empty(StatusCode::NOT_FOUND);
        assert!(resp.request().is_none());
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
