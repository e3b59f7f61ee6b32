use crate::circuit::{CircuitBreakerFactory, CircuitBreakerRegistry, breaker_key};
use crate::client::FeignClient;
use crate::config::{
    CircuitBreakerConfig, FeignClientConfig, LoadBalancerConfig, RetryConfig, TransportOptions,
};
use crate::descriptor::{ContractParser, MethodDescriptor};
use crate::error::FeignError;
use crate::fallback::FallbackFactory;
use crate::handler::MethodHandler;
use crate::interceptor::{HeaderInterceptor, RequestInterceptor};
use crate::layers::{
    CircuitBreakerLayer, ExecuteService, ExecuteShared, LoadBalancerLayer, PipelineService,
    RetryLayer, RetryPolicy, policy_from_config,
};
use crate::listener::{InvocationListener, Listeners, LogLevel, TracingListener};
use crate::resolver::{ServerResolver, Target};
use crate::status::{DefaultStatusHandler, StatusHandler};
use crate::transport::{HyperTransport, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use tower::Layer;
use tower::util::BoxCloneSyncService;

/// Builder for [`FeignClient`].
///
/// Collects the contract, collaborators and configuration, then validates
/// everything and composes one pipeline per method in [`FeignClientBuilder::build`].
#[must_use = "FeignClientBuilder does nothing until .build() is called"]
pub struct FeignClientBuilder {
    target: Target,
    config: FeignClientConfig,
    methods: Vec<MethodDescriptor>,
    contracts: Vec<Box<dyn ContractParser + Send>>,
    transport: Option<Arc<dyn Transport>>,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    listeners: Vec<Arc<dyn InvocationListener>>,
    status_handler: Option<Arc<dyn StatusHandler>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    resolver: Option<Arc<dyn ServerResolver>>,
    breaker_factory: Option<Arc<dyn CircuitBreakerFactory>>,
    fallback_factory: Option<Arc<dyn FallbackFactory>>,
}

impl FeignClientBuilder {
    /// Builder with default configuration
    pub fn new(target: Target) -> Self {
        Self::with_config(target, FeignClientConfig::default())
    }

    /// Builder with a specific configuration
    pub fn with_config(target: Target, config: FeignClientConfig) -> Self {
        Self {
            target,
            config,
            methods: Vec::new(),
            contracts: Vec::new(),
            transport: None,
            interceptors: Vec::new(),
            listeners: Vec::new(),
            status_handler: None,
            retry_policy: None,
            resolver: None,
            breaker_factory: None,
            fallback_factory: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: FeignClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Declare one method
    pub fn method(mut self, descriptor: MethodDescriptor) -> Self {
        self.methods.push(descriptor);
        self
    }

    /// Declare every method produced by `parser`
    pub fn contract(mut self, parser: impl ContractParser + Send + 'static) -> Self {
        self.contracts.push(Box::new(parser));
        self
    }

    /// Use a custom transport instead of the built-in hyper one
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Options for the built-in transport
    pub fn transport_options(mut self, options: TransportOptions) -> Self {
        self.config.transport = options;
        self
    }

    /// Append an interceptor; interceptors run in registration order
    pub fn interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Append a listener; listeners are notified in registration order
    pub fn listener(mut self, listener: Arc<dyn InvocationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn status_handler(mut self, handler: Arc<dyn StatusHandler>) -> Self {
        self.status_handler = Some(handler);
        self
    }

    /// Set the retry configuration, `None` disables the retry decorator
    pub fn retry(mut self, retry: Option<RetryConfig>) -> Self {
        self.config.retry = retry;
        self
    }

    /// Use a custom retry policy; enables the retry decorator
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Set load balancer budgets (logical targets only)
    pub fn load_balancer(mut self, config: Option<LoadBalancerConfig>) -> Self {
        self.config.load_balancer = config;
        self
    }

    /// Resolver for a logical target
    pub fn resolver(mut self, resolver: Arc<dyn ServerResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the circuit breaker configuration, `None` disables the decorator
    pub fn circuit_breaker(mut self, config: Option<CircuitBreakerConfig>) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Supply breakers from `factory`; enables the circuit breaker decorator
    pub fn breaker_factory(mut self, factory: Arc<dyn CircuitBreakerFactory>) -> Self {
        self.breaker_factory = Some(factory);
        self
    }

    /// Fallbacks for the circuit breaker decorator
    pub fn fallback_factory(mut self, factory: Arc<dyn FallbackFactory>) -> Self {
        self.fallback_factory = Some(factory);
        self
    }

    /// Treat 404 as an empty success
    pub fn decode404(mut self) -> Self {
        self.config.decode404 = true;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the maximum aggregated body size of single-valued methods
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Allow insecure HTTP connections (for testing only)
    ///
    /// **WARNING**: This should only be used for local testing with mock servers.
    /// Never use in production as it exposes traffic to interception.
    ///
    /// Only available in debug builds or with the `allow-insecure-http` feature.
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "modkit_feign::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport.allow_insecure_http = true;
        self
    }

    /// Validate the contract and compose one pipeline per method.
    ///
    /// # Errors
    /// Returns a construction error when a method declares an unsupported
    /// return shape, two methods share a key, a logical target has no
    /// resolver, or the built-in transport cannot be created.
    pub fn build(self) -> Result<FeignClient, FeignError> {
        let mut descriptors = self.methods;
        for contract in &self.contracts {
            descriptors.extend(contract.parse()?);
        }

        let mut seen = std::collections::HashSet::new();
        for descriptor in &descriptors {
            descriptor.validate()?;
            if !seen.insert(descriptor.key()) {
                return Err(FeignError::Configuration(format!(
                    "method '{}' is declared twice",
                    descriptor.key()
                )));
            }
        }

        if self.target.is_logical() && self.resolver.is_none() {
            return Err(FeignError::Configuration(format!(
                "target '{}' is a logical service but no server resolver is configured",
                self.target.name()
            )));
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(&self.config.transport)?),
        };

        let mut listeners: Vec<Arc<dyn InvocationListener>> = Vec::new();
        if self.config.log_level != LogLevel::None {
            listeners.push(Arc::new(TracingListener::new(self.config.log_level)));
        }
        listeners.extend(self.listeners);
        let listeners = Listeners::new(listeners);

        // User-Agent goes last so an interceptor-supplied value wins.
        let mut interceptors = self.interceptors;
        interceptors.push(Arc::new(HeaderInterceptor::user_agent(&self.config.user_agent)?));

        let shared = Arc::new(ExecuteShared {
            transport,
            interceptors,
            listeners: listeners.clone(),
            status_handler: self
                .status_handler
                .unwrap_or_else(|| Arc::new(DefaultStatusHandler::default())),
            decode404: self.config.decode404,
            max_body_size: self.config.max_body_size,
        });

        let retry_policy = self
            .retry_policy
            .or_else(|| self.config.retry.as_ref().map(policy_from_config));

        let breakers = match (self.breaker_factory, &self.config.circuit_breaker) {
            (Some(factory), _) => Some(factory),
            (None, Some(config)) => {
                Some(Arc::new(CircuitBreakerRegistry::new(config.clone())) as Arc<dyn CircuitBreakerFactory>)
            }
            (None, None) => None,
        };
        let breaker_config = self.config.circuit_breaker.clone().unwrap_or_default();

        // Logical targets always resolve; without a config there is no failover.
        let balancer_config = self.config.load_balancer.clone().unwrap_or(LoadBalancerConfig {
            max_retries_on_same: 0,
            max_retries_on_next: 0,
        });

        let target = Arc::new(self.target);
        let mut handlers = HashMap::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let descriptor = Arc::new(descriptor);
            let key = descriptor.key();

            // =======================================================================
            // Per-method stack (outer to inner):
            //   Retry → LoadBalancer → CircuitBreaker → Execute
            //
            // Each retry re-enters the balancer, so a fresh instance may be chosen,
            // and every attempt passes the breaker.
            // =======================================================================
            let mut service: PipelineService =
                BoxCloneSyncService::new(ExecuteService::new(Arc::clone(&shared)));

            if let Some(factory) = &breakers {
                let breaker = factory.for_key(&breaker_key(
                    key,
                    breaker_config.uniquifier.as_deref(),
                    breaker_config.key_by_target.then(|| target.name()),
                ));
                let fallback = self
                    .fallback_factory
                    .as_ref()
                    .and_then(|f| f.create(&target, key));
                service = BoxCloneSyncService::new(CircuitBreakerLayer::new(breaker, fallback).layer(service));
            }

            if target.is_logical() {
                service = BoxCloneSyncService::new(
                    LoadBalancerLayer::new(self.resolver.clone(), balancer_config.clone()).layer(service),
                );
            }

            if let Some(policy) = &retry_policy {
                service = BoxCloneSyncService::new(
                    RetryLayer::new(Arc::clone(policy), listeners.clone()).layer(service),
                );
            }

            tracing::debug!(method = key, target = %target, "Method pipeline built");
            let handler = MethodHandler::new(
                Arc::clone(&descriptor),
                Arc::clone(&target),
                service,
                listeners.clone(),
                self.config.max_body_size,
            );
            handlers.insert(key.to_owned(), handler);
        }

        Ok(FeignClient::new(target, handlers))
    }
}
