use super::Call;
use crate::config::LoadBalancerConfig;
use crate::error::{FeignError, TransportErrorKind};
use crate::resolver::{ServerInstance, ServerResolver, Target};
use crate::response::Response;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service, ServiceExt};

/// Where the next attempt should go after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failover {
    SameInstance,
    NextInstance,
    Stop,
}

fn classify(err: &FeignError) -> Failover {
    match err.root_cause() {
        FeignError::Transport {
            kind: TransportErrorKind::Connect,
            ..
        } => Failover::NextInstance,
        FeignError::Transport { .. }
        | FeignError::Body(_)
        | FeignError::Timeout(_)
        | FeignError::ExecutionTimeout { .. } => Failover::SameInstance,
        e if e.status().is_some_and(|s| s.is_server_error()) => Failover::SameInstance,
        _ => Failover::Stop,
    }
}

/// Tower layer routing logical-service calls to resolved instances.
#[derive(Clone)]
pub struct LoadBalancerLayer {
    resolver: Option<Arc<dyn ServerResolver>>,
    config: LoadBalancerConfig,
}

impl LoadBalancerLayer {
    #[must_use]
    pub fn new(resolver: Option<Arc<dyn ServerResolver>>, config: LoadBalancerConfig) -> Self {
        Self { resolver, config }
    }
}

impl<S> Layer<S> for LoadBalancerLayer {
    type Service = LoadBalancerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadBalancerService {
            inner,
            resolver: self.resolver.clone(),
            config: self.config.clone(),
        }
    }
}

/// Resolves an instance per attempt and fails over between instances.
///
/// Literal URL targets pass straight through. For logical targets, connect
/// failures move to a freshly resolved instance, while I/O failures, timeouts
/// and 5xx responses retry the same instance first. Each kind of retry has its
/// own budget; when both are spent the last error is wrapped in
/// `FeignError::OutOfRetries`. Anything else is returned unchanged.
#[derive(Clone)]
pub struct LoadBalancerService<S> {
    inner: S,
    resolver: Option<Arc<dyn ServerResolver>>,
    config: LoadBalancerConfig,
}

impl<S> Service<Call> for LoadBalancerService<S>
where
    S: Service<Call, Response = Response, Error = FeignError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = FeignError;
    type Future = BoxFuture<'static, Result<Response, FeignError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let service = match call.target() {
            Target::Url(_) => None,
            Target::Service(name) => Some(name.clone()),
        };
        let Some(service) = service else {
            return Box::pin(inner.call(call));
        };
        let resolver = self.resolver.clone();
        let config = self.config.clone();

        Box::pin(async move {
            let Some(resolver) = resolver else {
                return Err(FeignError::Configuration(format!(
                    "{}: target '{service}' is a logical service but no server resolver is configured",
                    call.method_key()
                )));
            };

            let mut attempts = 0u32;
            let mut same_retries = 0u32;
            let mut next_retries = 0u32;
            let mut server: Option<Arc<ServerInstance>> = None;

            loop {
                let instance = match &server {
                    Some(instance) => Arc::clone(instance),
                    None => {
                        let resolved = Arc::new(resolver.resolve(&service).await?);
                        server = Some(Arc::clone(&resolved));
                        resolved
                    }
                };

                attempts += 1;
                let mut svc = inner.clone();
                let result = match svc.ready().await {
                    Ok(svc) => svc.call(call.with_server(Arc::clone(&instance))).await,
                    Err(err) => Err(err),
                };
                let err = match result {
                    Ok(response) => return Ok(response),
                    Err(err) => err,
                };

                let failover = classify(&err);
                if failover == Failover::Stop {
                    return Err(err);
                }

                if failover == Failover::SameInstance && same_retries < config.max_retries_on_same {
                    same_retries += 1;
                    tracing::debug!(
                        method = call.method_key(),
                        service = %service,
                        server = %instance,
                        error = %err,
                        "Retrying same instance"
                    );
                } else if next_retries < config.max_retries_on_next {
                    next_retries += 1;
                    same_retries = 0;
                    server = None;
                    tracing::debug!(
                        method = call.method_key(),
                        service = %service,
                        failed = %instance,
                        error = %err,
                        "Failing over to next instance"
                    );
                } else {
                    tracing::debug!(
                        method = call.method_key(),
                        service = %service,
                        attempts,
                        "Load balancer retries exhausted"
                    );
                    return Err(FeignError::out_of_retries(attempts, err));
                }
            }
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::descriptor::MethodDescriptor;
    use crate::resolver::RoundRobinResolver;
    use http::{Method, StatusCode};
    use parking_lot::Mutex;

    fn call_for(target: Target) -> Call {
        let descriptor = MethodDescriptor::builder("Api#get()", Method::GET, "/")
            .build()
            .unwrap();
        Call::new(Arc::new(descriptor), vec![], Arc::new(target))
    }

    /// Records the instance of every attempt and fails with a scripted error.
    #[derive(Clone)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        fail: fn(&str) -> Option<FeignError>,
    }

    impl Service<Call> for Recorder {
        type Response = Response;
        type Error = FeignError;
        type Future = BoxFuture<'static, Result<Response, FeignError>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: Call) -> Self::Future {
            let server = call.server().map(ToString::to_string).unwrap_or_default();
            self.seen.lock().push(server.clone());
            let outcome = match (self.fail)(&server) {
                Some(err) => Err(err),
                None => Ok(Response::empty(StatusCode::OK)),
            };
            Box::pin(async move { outcome })
        }
    }

    fn resolver() -> Arc<dyn ServerResolver> {
        Arc::new(RoundRobinResolver::new().with_servers(
            "orders",
            vec![ServerInstance::new("a", 80), ServerInstance::new("b", 80)],
        ))
    }

    fn balancer(
        fail: fn(&str) -> Option<FeignError>,
        config: LoadBalancerConfig,
    ) -> (LoadBalancerService<Recorder>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = Recorder {
            seen: Arc::clone(&seen),
            fail,
        };
        (LoadBalancerLayer::new(Some(resolver()), config).layer(inner), seen)
    }

    #[tokio::test]
    async fn test_connect_failure_moves_to_next_instance() {
        let (mut svc, seen) = balancer(
            |server| {
                (server == "a:80").then(|| FeignError::transport(TransportErrorKind::Connect, "refused"))
            },
            LoadBalancerConfig {
                max_retries_on_same: 2,
                max_retries_on_next: 1,
            },
        );
        svc.ready()
            .await
            .unwrap()
            .call(call_for(Target::service("orders")))
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec!["a:80", "b:80"]);
    }

    #[tokio::test]
    async fn test_server_error_retries_same_then_next() {
        let (mut svc, seen) = balancer(
            |_| {
                Some(FeignError::Status {
                    method_key: "Api#get()".to_owned(),
                    status: StatusCode::BAD_GATEWAY,
                    body_preview: String::new(),
                    content_type: None,
                    retry_after: None,
                })
            },
            LoadBalancerConfig {
                max_retries_on_same: 1,
                max_retries_on_next: 1,
            },
        );
        let err = svc
            .ready()
            .await
            .unwrap()
            .call(call_for(Target::service("orders")))
            .await
            .unwrap_err();
        assert_eq!(*seen.lock(), vec!["a:80", "a:80", "b:80", "b:80"]);
        assert!(matches!(err, FeignError::OutOfRetries { attempts: 4, .. }));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (mut svc, seen) = balancer(
            |_| {
                Some(FeignError::Status {
                    method_key: "Api#get()".to_owned(),
                    status: StatusCode::BAD_REQUEST,
                    body_preview: String::new(),
                    content_type: None,
                    retry_after: None,
                })
            },
            LoadBalancerConfig::default(),
        );
        let err = svc
            .ready()
            .await
            .unwrap()
            .call(call_for(Target::service("orders")))
            .await
            .unwrap_err();
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_url_target_passes_through() {
        let (mut svc, seen) = balancer(|_| None, LoadBalancerConfig::default());
        svc.ready()
            .await
            .unwrap()
            .call(call_for(Target::url("http://localhost:1")))
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![String::new()]);
    }

    #[tokio::test]
    async fn test_missing_resolver_is_configuration_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut svc = LoadBalancerLayer::new(None, LoadBalancerConfig::default()).layer(Recorder {
            seen,
            fail: |_| None,
        });
        let err = svc
            .ready()
            .await
            .unwrap()
            .call(call_for(Target::service("orders")))
            .await
            .unwrap_err();
        assert!(matches!(err, FeignError::Configuration(_)));
    }
}
