#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Declarative HTTP clients for `ModKit`
//!
//! A client is described as a set of method templates ([`MethodDescriptor`]).
//! Each invocation expands its template with the call arguments and runs
//! through a per-method pipeline of tower layers:
//!
//! - **Retry** - bounded re-invocation with backoff, honoring `Retry-After`
//! - **Load balancing** - per-attempt instance selection and failover for logical targets
//! - **Circuit breaker** - fail fast on unhealthy methods, optional fallbacks
//! - **Execution** - interceptors, transport, status classification
//!
//! Results are either a single (possibly empty) element or a lazy element
//! stream. Streams are cold: nothing is sent until the first poll, and dropping
//! the stream cancels the call.
//!
//! The built-in transport is hyper with rustls (HTTPS only by default),
//! connection pooling and transparent response decompression.
//!
//! # Example
//!
//! ```ignore
//! use modkit_feign::{Arg, FeignClient, MethodDescriptor, Target};
//! use http::Method;
//!
//! let find = MethodDescriptor::builder("OrderApi#find(id)", Method::GET, "/orders/{id}")
//!     .param(0, "id")
//!     .build()?;
//!
//! let client = FeignClient::builder(Target::url("https://orders.example.com"))
//!     .method(find)
//!     .build()?;
//!
//! let order: Option<Order> = client
//!     .handler("OrderApi#find(id)")
//!     .expect("declared")
//!     .invoke_json(vec![Arg::from(42)])
//!     .await?;
//! ```

mod args;
mod builder;
mod circuit;
mod client;
pub mod codec;
pub mod config;
mod descriptor;
mod error;
mod expander;
mod fallback;
mod handler;
mod interceptor;
pub mod layers;
mod listener;
mod request;
mod resolver;
mod response;
mod status;
mod template;
pub mod transport;

pub use args::Arg;
pub use builder::FeignClientBuilder;
pub use circuit::{
    CallPermit, CircuitBreaker, CircuitBreakerFactory, CircuitBreakerRegistry, CircuitState,
    breaker_key,
};
pub use client::FeignClient;
pub use config::{
    Backoff, CircuitBreakerConfig, DEFAULT_MAX_BODY_SIZE, DEFAULT_USER_AGENT, ExponentialBackoff,
    FeignClientConfig, LoadBalancerConfig, RetryConfig, TlsRootConfig, TransportOptions,
};
pub use descriptor::{ContractParser, MethodDescriptor, MethodDescriptorBuilder, ReturnShape};
pub use error::{BoxError, FeignError, InvalidUriKind, TransportErrorKind};
pub use expander::expand;
pub use fallback::{Fallback, FallbackFactory, StaticFallbackFactory};
pub use handler::{MethodHandler, Reply};
pub use interceptor::{HeaderInterceptor, RequestInterceptor};
pub use layers::{
    BasicRetryPolicy, Call, FilteredRetryPolicy, RetryDecision, RetryPolicy, calculate_backoff,
};
pub use listener::{InvocationListener, Listeners, LogLevel, TracingListener};
pub use request::{BodyStream, HeaderList, Request, RequestBody};
pub use resolver::{RoundRobinResolver, ServerInstance, ServerResolver, Target};
pub use response::{ERROR_BODY_PREVIEW_LIMIT, Response, parse_retry_after};
pub use status::{CompositeStatusHandler, DefaultStatusHandler, PredicateStatusHandler, StatusHandler};
pub use template::{Encoding, Substitutions, Template};
pub use transport::{HyperTransport, Transport};
