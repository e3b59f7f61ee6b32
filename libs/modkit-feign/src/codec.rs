//! JSON helpers for request bodies and response elements.

use crate::error::FeignError;
use crate::request::{BodyStream, RequestBody};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serialize `value` as a JSON request body.
///
/// # Errors
/// Returns `FeignError::Json` if serialization fails.
pub fn json_body<T: Serialize + ?Sized>(value: &T) -> Result<RequestBody, FeignError> {
    Ok(RequestBody::Bytes(Bytes::from(serde_json::to_vec(value)?)))
}

/// Decode one JSON value.
///
/// # Errors
/// Returns `FeignError::Json` if the bytes are not a valid `T`.
pub fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, FeignError> {
    Ok(serde_json::from_slice(body)?)
}

struct Lines {
    body: BodyStream,
    buffer: BytesMut,
    eof: bool,
}

/// Split a chunk stream on `\n` and decode every non-blank line as JSON.
///
/// Lines may span chunk boundaries. A trailing line without a newline is
/// decoded at end of stream. The stream ends after the first body error.
pub fn ndjson<T>(body: BodyStream) -> BoxStream<'static, Result<T, FeignError>>
where
    T: DeserializeOwned + Send + 'static,
{
    let state = Lines {
        body,
        buffer: BytesMut::new(),
        eof: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                let line = state.buffer.split_to(pos + 1);
                let line = line[..pos].trim_ascii();
                if line.is_empty() {
                    continue;
                }
                return Some((decode_json(line), state));
            }

            if state.eof {
                let rest = state.buffer.split();
                let rest = rest.trim_ascii();
                if rest.is_empty() {
                    return None;
                }
                return Some((decode_json(rest), state));
            }

            match state.body.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(err)) => {
                    state.buffer.clear();
                    state.eof = true;
                    return Some((Err(err), state));
                }
                None => state.eof = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Event {
        id: u32,
    }

    fn chunks(parts: &[&'static str]) -> BodyStream {
        stream::iter(parts.to_vec().into_iter().map(|p| Ok(Bytes::from_static(p.as_bytes())))).boxed()
    }

    #[tokio::test]
    async fn test_ndjson_lines_span_chunks() {
        let events: Vec<Event> = ndjson(chunks(&["{\"id\":1}\n{\"i", "d\":2}\n\n", "{\"id\":3}"]))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(events, vec![Event { id: 1 }, Event { id: 2 }, Event { id: 3 }]);
    }

    #[tokio::test]
    async fn test_ndjson_stops_after_body_error() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"{\"id\":1}\n{\"id\"")),
            Err(FeignError::Timeout(std::time::Duration::from_secs(1))),
        ])
        .boxed();
        let items: Vec<Result<Event, FeignError>> = ndjson(body).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Event { id: 1 });
        assert!(matches!(items[1], Err(FeignError::Timeout(_))));
    }

    #[test]
    fn test_json_body_roundtrip_shape() {
        let body = json_body(&serde_json::json!({"name": "a"})).unwrap();
        assert_eq!(body.known_len(), Some(12));
        let err = decode_json::<Event>(b"not json").unwrap_err();
        assert!(matches!(err, FeignError::Json(_)));
    }
}
