//! Tower layers composing the per-method invocation pipeline.
//!
//! Every method gets its own stack, built once by the client builder. From the
//! outermost layer inwards:
//!
//! - [`RetryLayer`] - re-invokes the rest of the stack per [`RetryPolicy`]
//! - [`LoadBalancerLayer`] - picks a server instance per attempt (logical targets only)
//! - [`CircuitBreakerLayer`] - fails fast while the breaker is open, applies fallbacks
//! - [`ExecuteService`] - expands, intercepts, sends and classifies one attempt
//!
//! Layers pass a [`Call`] down and get a [`Response`] or [`FeignError`] back.

mod balancer;
mod breaker;
mod execute;
mod retry;

pub use balancer::{LoadBalancerLayer, LoadBalancerService};
pub use breaker::{CircuitBreakerLayer, CircuitBreakerService};
pub use execute::ExecuteService;
pub(crate) use execute::ExecuteShared;
pub(crate) use retry::policy_from_config;
pub use retry::{
    BasicRetryPolicy, FilteredRetryPolicy, RetryDecision, RetryLayer, RetryPolicy, RetryService,
    calculate_backoff,
};

use crate::args::Arg;
use crate::descriptor::MethodDescriptor;
use crate::error::FeignError;
use crate::resolver::{ServerInstance, Target};
use crate::response::Response;
use std::sync::Arc;
use tower::util::BoxCloneSyncService;

/// Type-erased method pipeline.
pub type PipelineService = BoxCloneSyncService<Call, Response, FeignError>;

/// One invocation travelling down the pipeline.
///
/// Cheap to clone: retries and failovers re-send the same call, only the
/// selected server changes between attempts.
#[derive(Debug, Clone)]
pub struct Call {
    descriptor: Arc<MethodDescriptor>,
    args: Arc<[Arg]>,
    target: Arc<Target>,
    server: Option<Arc<ServerInstance>>,
}

impl Call {
    #[must_use]
    pub fn new(descriptor: Arc<MethodDescriptor>, args: Vec<Arg>, target: Arc<Target>) -> Self {
        Self {
            descriptor,
            args: args.into(),
            target,
            server: None,
        }
    }

    #[must_use]
    pub fn method_key(&self) -> &str {
        self.descriptor.key()
    }

    #[must_use]
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Instance chosen by the load balancer for this attempt.
    #[must_use]
    pub fn server(&self) -> Option<&ServerInstance> {
        self.server.as_deref()
    }

    /// Same call, routed to `server`.
    #[must_use]
    pub fn with_server(&self, server: Arc<ServerInstance>) -> Self {
        Self {
            server: Some(server),
            ..self.clone()
        }
    }
}
