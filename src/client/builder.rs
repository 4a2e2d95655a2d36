use std::sync::Arc;
use std::time::Duration;

use crate::LbResult;
use crate::config::{ConfigResolver, ConfigSource, StatusPolicy};
use crate::directory::ServerDirectory;
use crate::metrics::LoadBalancerMetrics;
use crate::retry::{RetryCoordinator, Retryer};
use crate::selector::{RoundRobinSelector, ServerSelector};
use crate::transport::Transport;

use super::{DEFAULT_USER_AGENT, LoadBalancedClient};

pub struct LoadBalancedClientBuilder {
    config: Arc<dyn ConfigSource>,
    directory: Option<Arc<ServerDirectory>>,
    selector: Arc<dyn ServerSelector>,
    transport: Option<Arc<dyn Transport>>,
    retryer: Retryer,
    status_policy: StatusPolicy,
    total_timeout: Option<Duration>,
    user_agent: String,
}

impl LoadBalancedClientBuilder {
    pub(crate) fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            config,
            directory: None,
            selector: Arc::new(RoundRobinSelector::new()),
            transport: None,
            retryer: Retryer::standard(),
            status_policy: StatusPolicy::Error,
            total_timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }

    /// Shares an existing directory instead of building one over the configuration source.
    pub fn directory(mut self, directory: Arc<ServerDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn selector(mut self, selector: Arc<dyn ServerSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn retryer(mut self, retryer: Retryer) -> Self {
        self.retryer = retryer;
        self
    }

    pub fn status_policy(mut self, status_policy: StatusPolicy) -> Self {
        self.status_policy = status_policy;
        self
    }

    /// Bounds a whole call, Retryer rounds and backoff included.
    pub fn total_timeout(mut self, total_timeout: Duration) -> Self {
        self.total_timeout = Some(total_timeout.max(Duration::from_millis(1)));
        self
    }

    /// User agent of the default `ureq` transport. Ignored when a transport is supplied.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> LbResult<LoadBalancedClient> {
        let resolver = ConfigResolver::new(Arc::clone(&self.config));
        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(ServerDirectory::from_config(resolver.clone())));
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&self.user_agent)?,
        };

        Ok(LoadBalancedClient {
            resolver,
            directory,
            selector: self.selector,
            transport,
            coordinator: RetryCoordinator,
            retryer: self.retryer,
            status_policy: self.status_policy,
            total_timeout: self.total_timeout,
            metrics: LoadBalancerMetrics::default(),
        })
    }
}

#[cfg(feature = "ureq-transport")]
fn default_transport(user_agent: &str) -> LbResult<Arc<dyn Transport>> {
    Ok(Arc::new(crate::transport::UreqTransport::new(user_agent)))
}

#[cfg(not(feature = "ureq-transport"))]
fn default_transport(user_agent: &str) -> LbResult<Arc<dyn Transport>> {
    Err(crate::error::invalid_config(
        "transport",
        user_agent,
        "no transport supplied and the ureq-transport feature is disabled",
    ))
}
