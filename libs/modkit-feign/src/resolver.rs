//! Client targets and server resolution.

use crate::error::FeignError;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Where a client sends its requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Literal base URL (`https://api.example.com/v1`); no load balancing
    Url(String),
    /// Logical service name resolved per attempt through a [`ServerResolver`]
    Service(String),
}

impl Target {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn service(name: impl Into<String>) -> Self {
        Self::Service(name.into())
    }

    /// URL or service name, used in breaker keys and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Service(name) => name,
        }
    }

    #[must_use]
    pub fn is_logical(&self) -> bool {
        matches!(self, Self::Service(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::Service(name) => write!(f, "service:{name}"),
        }
    }
}

/// One candidate backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInstance {
    host: String,
    port: u16,
    secure: bool,
    metadata: BTreeMap<String, String>,
}

impl ServerInstance {
    /// Plain-HTTP instance.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            secure: false,
            metadata: BTreeMap::new(),
        }
    }

    /// HTTPS instance.
    pub fn secure(host: impl Into<String>, port: u16) -> Self {
        Self {
            secure: true,
            ..Self::new(host, port)
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// `scheme://host:port` of this instance.
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("{scheme}://[{}]:{}", self.host, self.port)
        } else {
            format!("{scheme}://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolves a logical service name to a concrete instance.
///
/// Called once per attempt; successive calls may return different instances.
#[async_trait]
pub trait ServerResolver: Send + Sync {
    /// # Errors
    /// Returns `FeignError::NoInstances` when the service has no candidates.
    async fn resolve(&self, service: &str) -> Result<ServerInstance, FeignError>;
}

#[derive(Default)]
struct ServerPool {
    servers: ArcSwap<Vec<ServerInstance>>,
    next: AtomicUsize,
}

/// Round-robin resolver over explicitly supplied server lists.
///
/// Lists change through [`RoundRobinResolver::set_servers`] or a `watch`
/// subscription; there is no ambient global registry.
#[derive(Default)]
pub struct RoundRobinResolver {
    pools: DashMap<String, Arc<ServerPool>>,
}

impl RoundRobinResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`RoundRobinResolver::set_servers`].
    #[must_use]
    pub fn with_servers(self, service: &str, servers: Vec<ServerInstance>) -> Self {
        self.set_servers(service, servers);
        self
    }

    /// Replace the server list of `service`.
    ///
    /// In-flight selections keep the list they started with.
    pub fn set_servers(&self, service: &str, servers: Vec<ServerInstance>) {
        tracing::debug!(service, count = servers.len(), "server list updated");
        self.pool(service).servers.store(Arc::new(servers));
    }

    /// Current server list of `service`.
    #[must_use]
    pub fn servers(&self, service: &str) -> Vec<ServerInstance> {
        self.pools
            .get(service)
            .map(|p| p.servers.load().as_ref().clone())
            .unwrap_or_default()
    }

    /// Keep `service` in sync with a `watch` channel.
    ///
    /// The current value is applied immediately. The task ends when the
    /// sender is dropped or the resolver is gone.
    pub fn subscribe(
        self: &Arc<Self>,
        service: &str,
        mut updates: watch::Receiver<Vec<ServerInstance>>,
    ) -> JoinHandle<()> {
        self.set_servers(service, updates.borrow_and_update().clone());
        let resolver: Weak<Self> = Arc::downgrade(self);
        let service = service.to_owned();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let Some(resolver) = resolver.upgrade() else {
                    break;
                };
                resolver.set_servers(&service, updates.borrow_and_update().clone());
            }
            tracing::debug!(service = %service, "server list subscription ended");
        })
    }

    fn pool(&self, service: &str) -> Arc<ServerPool> {
        Arc::clone(
            self.pools
                .entry(service.to_owned())
                .or_insert_with(|| Arc::new(ServerPool::default()))
                .value(),
        )
    }
}

#[async_trait]
impl ServerResolver for RoundRobinResolver {
    async fn resolve(&self, service: &str) -> Result<ServerInstance, FeignError> {
        let no_instances = || FeignError::NoInstances {
            service: service.to_owned(),
        };
        let pool = self.pools.get(service).map(|p| Arc::clone(p.value())).ok_or_else(no_instances)?;
        let servers = pool.servers.load();
        if servers.is_empty() {
            return Err(no_instances());
        }
        let index = pool.next.fetch_add(1, Ordering::Relaxed) % servers.len();
        Ok(servers[index].clone())
    }
}
