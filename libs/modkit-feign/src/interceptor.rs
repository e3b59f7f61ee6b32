use crate::error::FeignError;
use crate::request::Request;
use http::header::{HeaderName, HeaderValue};

/// Pure `Request -> Request` transform applied before every attempt.
///
/// Interceptors run in registration order; each sees the output of the
/// previous one. An error aborts the attempt and is not retried.
pub trait RequestInterceptor: Send + Sync {
    /// # Errors
    /// Returns an error if the request cannot be transformed.
    fn apply(&self, request: Request) -> Result<Request, FeignError>;
}

impl<F> RequestInterceptor for F
where
    F: Fn(Request) -> Result<Request, FeignError> + Send + Sync,
{
    fn apply(&self, request: Request) -> Result<Request, FeignError> {
        self(request)
    }
}

/// Adds a fixed header to every request.
#[derive(Debug, Clone)]
pub struct HeaderInterceptor {
    name: HeaderName,
    value: HeaderValue,
    overwrite: bool,
}

impl HeaderInterceptor {
    /// Set `name` only when the request does not carry it yet.
    ///
    /// # Errors
    /// Returns `FeignError::InvalidHeaderName`/`InvalidHeaderValue` for malformed input.
    pub fn if_absent(name: &str, value: impl AsRef<str>) -> Result<Self, FeignError> {
        Ok(Self {
            name: HeaderName::try_from(name)?,
            value: HeaderValue::from_str(value.as_ref())?,
            overwrite: false,
        })
    }

    /// Always set `name`, replacing any value already present.
    ///
    /// # Errors
    /// Returns `FeignError::InvalidHeaderName`/`InvalidHeaderValue` for malformed input.
    pub fn overwrite(name: &str, value: impl AsRef<str>) -> Result<Self, FeignError> {
        Ok(Self {
            overwrite: true,
            ..Self::if_absent(name, value)?
        })
    }

    /// User-Agent header, added only if absent.
    ///
    /// # Errors
    /// Returns `FeignError::InvalidHeaderValue` if the user agent string is not valid
    pub fn user_agent(user_agent: impl AsRef<str>) -> Result<Self, FeignError> {
        Self::if_absent(http::header::USER_AGENT.as_str(), user_agent)
    }
}

impl RequestInterceptor for HeaderInterceptor {
    fn apply(&self, request: Request) -> Result<Request, FeignError> {
        if self.overwrite {
            return Ok(request.with_header_replaced(self.name.clone(), self.value.clone()));
        }
        if request.headers().contains(&self.name) {
            return Ok(request);
        }
        Ok(request.with_header(self.name.clone(), self.value.clone()))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::request::{HeaderList, RequestBody};
    use http::{Method, Uri};
    use std::sync::Arc;

    fn request(headers: HeaderList) -> Request {
        Request::new(
            Arc::from("Api#get()"),
            Method::GET,
            Uri::from_static("http://localhost/"),
            headers,
            RequestBody::Empty,
        )
    }

    #[test]
    fn test_user_agent_kept_when_present() {
        let mut headers = HeaderList::new();
        headers.append(http::header::USER_AGENT, HeaderValue::from_static("custom/1.0"));

        let ua = HeaderInterceptor::user_agent("modkit-feign/test").unwrap();
        let req = ua.apply(request(headers)).unwrap();
        assert_eq!(req.headers().get_all("user-agent").len(), 1);
        assert_eq!(req.headers().get("user-agent").unwrap(), "custom/1.0");

        let req = ua.apply(request(HeaderList::new())).unwrap();
        assert_eq!(req.headers().get("user-agent").unwrap(), "modkit-feign/test");
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let mut headers = HeaderList::new();
        headers.append(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer old"));

        let auth = HeaderInterceptor::overwrite("authorization", "Bearer new").unwrap();
        let req = auth.apply(request(headers)).unwrap();
        assert_eq!(req.headers().get("authorization").unwrap(), "Bearer new");
    }

    #[test]
    fn test_closures_chain_in_order() {
        let first = |r: Request| -> Result<Request, FeignError> {
            Ok(r.with_header(
                HeaderName::from_static("x-step"),
                HeaderValue::from_static("1"),
            ))
        };
        let second = |r: Request| -> Result<Request, FeignError> {
            let seen = r.headers().get_all("x-step").len();
            Ok(r.with_header(
                HeaderName::from_static("x-seen"),
                HeaderValue::from(seen),
            ))
        };
        let chain: Vec<Box<dyn RequestInterceptor>> = vec![Box::new(first), Box::new(second)];

        let mut req = request(HeaderList::new());
        for i in &chain {
            req = i.apply(req).unwrap();
        }
        assert_eq!(req.headers().get("x-seen").unwrap(), "1");
    }

    #[test]
    fn test_invalid_header_rejected() {
        assert!(HeaderInterceptor::if_absent("bad name", "v").is_err());
        assert!(HeaderInterceptor::user_agent("bad\nagent").is_err());
    }
}
