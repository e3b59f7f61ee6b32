use crate::listener::LogLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default User-Agent string for outgoing requests
pub const DEFAULT_USER_AGENT: &str = concat!("modkit-feign/", env!("CARGO_PKG_VERSION"));

/// Default cap on an aggregated single-value response body (10 MB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Exponential backoff configuration
///
/// Computes delay as: `min(initial * multiplier^(attempt - 1), max)` with optional jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExponentialBackoff {
    /// Initial backoff duration (default: 100ms)
    #[serde(with = "humantime_serde")]
    pub initial: Duration,

    /// Maximum backoff duration (default: 10s)
    #[serde(with = "humantime_serde")]
    pub max: Duration,

    /// Backoff multiplier for exponential growth (default: 2.0)
    pub multiplier: f64,

    /// Add a random 0-25% to each delay (default: true)
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Default::default()
        }
    }

    /// Fast backoff for tests (1ms initial, 100ms max, no jitter)
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Delay applied between retry attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
#[non_exhaustive]
pub enum Backoff {
    /// Retry immediately
    None,
    /// Same delay before every retry
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Growing delay, see [`ExponentialBackoff`]
    Exponential(ExponentialBackoff),
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential(ExponentialBackoff::default())
    }
}

/// Retry decorator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the initial attempt (0 = no retries, default: 3).
    /// Total attempts = 1 + `max_retries`.
    pub max_retries: u32,

    /// Backoff ceiling; a server `Retry-After` hint can only shorten it
    pub backoff: Backoff,

    /// Also retry client request errors (4xx except 408/429). Default: false.
    pub retry_client_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
            retry_client_errors: false,
        }
    }
}

impl RetryConfig {
    /// Config with no retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Config for tests: `max_retries` retries with millisecond backoff
    #[must_use]
    pub fn fast(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Exponential(ExponentialBackoff::fast()),
            retry_client_errors: false,
        }
    }
}

/// Load-balancing retry budgets.
///
/// Only applies to clients whose target is a logical service name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadBalancerConfig {
    /// Retries against the instance that just failed (default: 0)
    pub max_retries_on_same: u32,

    /// Failovers to a freshly resolved instance (default: 1)
    pub max_retries_on_next: u32,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            max_retries_on_same: 0,
            max_retries_on_next: 1,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Failures within the rolling window that open the circuit (default: 5)
    pub failure_threshold: u32,

    /// Calls within the rolling window before the threshold is evaluated (default: 5)
    pub minimum_calls: u32,

    /// Length of the statistics window (default: 10s)
    #[serde(with = "humantime_serde")]
    pub rolling_window: Duration,

    /// Time spent OPEN before trial calls are admitted (default: 5s)
    #[serde(with = "humantime_serde")]
    pub sleep_window: Duration,

    /// Concurrent trial calls admitted while HALF_OPEN (default: 1)
    pub half_open_max_calls: u32,

    /// Calls running longer than this are cancelled and counted as failures
    #[serde(with = "humantime_serde::option")]
    pub execution_timeout: Option<Duration>,

    /// Extra component of the breaker key, for independent breakers on the same method
    pub uniquifier: Option<String>,

    /// Key breakers by client target as well as by method (default: true)
    pub key_by_target: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            minimum_calls: 5,
            rolling_window: Duration::from_secs(10),
            sleep_window: Duration::from_secs(5),
            half_open_max_calls: 1,
            execution_timeout: None,
            uniquifier: None,
            key_by_target: true,
        }
    }
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport-agnostic tuning knobs.
///
/// Every transport reads the fields it understands and ignores the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportOptions {
    /// TCP connect timeout (default: 10s)
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Per-attempt timeout covering the exchange up to response headers (default: 30s)
    #[serde(with = "humantime_serde::option")]
    pub request_timeout: Option<Duration>,

    /// Advertise and transparently decode gzip/br/deflate (default: true)
    pub compression: bool,

    /// Follow 3xx redirects (default: false)
    pub follow_redirects: bool,

    /// Proxy URL
    pub proxy: Option<String>,

    /// Idle pooled connections are closed after this long (default: 90s)
    #[serde(with = "humantime_serde::option")]
    pub pool_idle_timeout: Option<Duration>,

    /// Idle connections kept per host (default: 32)
    pub pool_max_idle_per_host: usize,

    /// Permit plain `http://` URLs (default: false)
    pub allow_insecure_http: bool,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Some(Duration::from_secs(30)),
            compression: true,
            follow_redirects: false,
            proxy: None,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            allow_insecure_http: false,
            tls_roots: TlsRootConfig::default(),
        }
    }
}

impl TransportOptions {
    /// Options for local mock servers (plain HTTP allowed, short timeouts)
    ///
    /// **WARNING**: Never use in production.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            request_timeout: Some(Duration::from_secs(10)),
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            allow_insecure_http: true,
            ..Default::default()
        }
    }
}

/// Overall declarative client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeignClientConfig {
    /// Verbosity of the built-in tracing listener (default: `Basic`)
    pub log_level: LogLevel,

    /// Treat 404 as an empty success (default: false). Never applies to other codes.
    pub decode404: bool,

    /// Cap on an aggregated single-value body (default: 10 MB)
    pub max_body_size: usize,

    /// User-Agent header value, set only if the request has none
    pub user_agent: String,

    /// Retry decorator, `None` disables it
    pub retry: Option<RetryConfig>,

    /// Load balancer budgets, used when the target is a logical service
    pub load_balancer: Option<LoadBalancerConfig>,

    /// Circuit breaker decorator, `None` disables it
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Options handed to the built-in transport
    pub transport: TransportOptions,
}

impl Default for FeignClientConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Basic,
            decode404: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            retry: Some(RetryConfig::default()),
            load_balancer: Some(LoadBalancerConfig::default()),
            circuit_breaker: None,
            transport: TransportOptions::default(),
        }
    }
}

impl FeignClientConfig {
    /// No retry, no breaker, small body limit
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            log_level: LogLevel::None,
            max_body_size: 1024 * 1024,
            retry: None,
            load_balancer: None,
            circuit_breaker: None,
            ..Default::default()
        }
    }

    /// Every decorator enabled with production defaults
    #[must_use]
    pub fn resilient() -> Self {
        Self {
            retry: Some(RetryConfig {
                max_retries: 5,
                ..RetryConfig::default()
            }),
            load_balancer: Some(LoadBalancerConfig {
                max_retries_on_same: 1,
                max_retries_on_next: 2,
            }),
            circuit_breaker: Some(CircuitBreakerConfig::default()),
            ..Default::default()
        }
    }

    /// Config for tests against mock servers: no decorators, plain HTTP allowed
    ///
    /// **WARNING**: Never use in production.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            log_level: LogLevel::Full,
            max_body_size: 1024 * 1024,
            retry: None,
            load_balancer: None,
            circuit_breaker: None,
            transport: TransportOptions::for_testing(),
            ..Default::default()
        }
    }
}
