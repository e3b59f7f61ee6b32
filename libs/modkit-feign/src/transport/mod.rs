//! Wire transport boundary.
//!
//! The pipeline hands a fully resolved [`Request`] to a [`Transport`] and gets
//! one [`Response`] back whose body is a lazy chunk stream. Connection pooling,
//! protocol selection and TLS are the transport's business.

mod hyper_transport;
mod tls;

pub use hyper_transport::HyperTransport;

use crate::error::FeignError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;

/// Executes one HTTP exchange.
///
/// Implementations must not retry on their own: retries are re-invocations of
/// the whole pipeline. Dropping the returned future (or the response body)
/// cancels the exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the response once headers arrive.
    ///
    /// # Errors
    /// Returns `FeignError::Transport` (classified `Connect` or `Io`),
    /// `FeignError::Timeout`, or a construction error for requests the
    /// transport refuses to send.
    async fn execute(&self, request: &Request) -> Result<Response, FeignError>;
}
