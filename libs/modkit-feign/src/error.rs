use std::time::Duration;
use thiserror::Error;

/// Boxed error type used for opaque causes (transport, custom decoders).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// Expanded URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
}

/// What went wrong at the transport level.
///
/// The load balancer uses this to decide between retrying the same instance
/// and failing over to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportErrorKind {
    /// The connection could not be established (refused, DNS, TLS handshake)
    Connect,
    /// The connection was established but the exchange failed
    Io,
}

/// Error type for every stage of a declarative client invocation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FeignError {
    /// Template expansion produced a URL that does not parse
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The expanded URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// URL scheme is not allowed by the transport security settings
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },

    /// TLS could not be configured (no usable root certificates, ...)
    #[error("TLS configuration failed: {0}")]
    Tls(#[source] BoxError),

    /// Invalid header name in a template or header-map argument
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value after expansion
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// A method declares a return shape the pipeline cannot adapt to
    #[error("Method {method_key} declares unsupported return type '{shape}'")]
    UnsupportedReturnShape { method_key: String, shape: String },

    /// Client wiring is inconsistent (duplicate methods, missing resolver, ...)
    #[error("Invalid client configuration: {0}")]
    Configuration(String),

    /// A one-shot request body was opened a second time (e.g. by a retry)
    #[error("Request body of {method_key} is one-shot and was already consumed")]
    BodyConsumed { method_key: String },

    /// Transport error (network, connection, etc)
    #[error("Transport error: {source}")]
    Transport {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },

    /// Single request attempt timed out at the transport
    #[error("Request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx status selected by the status handler
    #[error("{method_key} failed with HTTP {status}: {body_preview}")]
    Status {
        method_key: String,
        status: http::StatusCode,
        body_preview: String,
        content_type: Option<String>,
        /// Parsed `Retry-After` header value, if present and valid
        retry_after: Option<Duration>,
    },

    /// Domain error produced by a custom status handler
    #[error("{method_key} failed with HTTP {status}: {source}")]
    Decoded {
        method_key: String,
        status: http::StatusCode,
        retry_after: Option<Duration>,
        #[source]
        source: BoxError,
    },

    /// The resolver had no instance for a logical service
    #[error("No instances available for service '{service}'")]
    NoInstances { service: String },

    /// Retry or failover budget exhausted; wraps the last underlying failure
    #[error("Out of retries after {attempts} attempts: {source}")]
    OutOfRetries {
        attempts: u32,
        #[source]
        source: Box<FeignError>,
    },

    /// Synthetic failure raised by an open circuit, no transport call was made
    #[error("Circuit breaker open for {breaker_key}")]
    CircuitOpen { breaker_key: String },

    /// Call exceeded the circuit breaker execution timeout and was cancelled
    #[error("Execution of {method_key} timed out after {timeout:?}")]
    ExecutionTimeout {
        method_key: String,
        timeout: Duration,
    },

    /// Single-value response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Response body stream failed mid-way
    #[error("Response body error: {0}")]
    Body(#[source] BoxError),

    /// JSON parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),
}

impl FeignError {
    /// Wrap an opaque cause as a transport failure of the given kind.
    pub fn transport(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            kind,
            source: source.into(),
        }
    }

    /// Build an `OutOfRetries` error, flattening nested exhaustion so the
    /// source is always the last underlying failure.
    #[must_use]
    pub fn out_of_retries(attempts: u32, last: FeignError) -> Self {
        let source = match last {
            FeignError::OutOfRetries { source, .. } => source,
            other => Box::new(other),
        };
        Self::OutOfRetries { attempts, source }
    }

    /// Errors raised while building the request or the client.
    ///
    /// These fail fast and are never retried.
    #[must_use]
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            Self::InvalidUri { .. }
                | Self::InvalidScheme { .. }
                | Self::Tls(_)
                | Self::InvalidHeaderName(_)
                | Self::InvalidHeaderValue(_)
                | Self::UnsupportedReturnShape { .. }
                | Self::Configuration(_)
                | Self::BodyConsumed { .. }
                | Self::FormEncode(_)
        )
    }

    /// HTTP status carried by a decoded error, if any.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self.root_cause() {
            Self::Status { status, .. } | Self::Decoded { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// "The client sent a bad request": a decoded 4xx other than 408 and 429.
    ///
    /// These are not service faults. They are excluded from retries by the
    /// filtering policy, from circuit failure accounting and from fallbacks.
    #[must_use]
    pub fn is_client_request_error(&self) -> bool {
        self.status().is_some_and(|s| {
            s.is_client_error()
                && s != http::StatusCode::REQUEST_TIMEOUT
                && s != http::StatusCode::TOO_MANY_REQUESTS
        })
    }

    /// Rejected by an open circuit without reaching the transport.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self.root_cause(), Self::CircuitOpen { .. })
    }

    /// Server-provided retry hint, if the failure carried one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self.root_cause() {
            Self::Status { retry_after, .. } | Self::Decoded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// The underlying failure behind an `OutOfRetries` wrapper, or `self`.
    #[must_use]
    pub fn root_cause(&self) -> &FeignError {
        match self {
            Self::OutOfRetries { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
