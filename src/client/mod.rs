use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigResolver, StatusPolicy};
use crate::directory::ServerDirectory;
use crate::metrics::{LoadBalancerMetrics, LoadBalancerMetricsSnapshot};
use crate::retry::{RetryCoordinator, Retryer};
use crate::selector::ServerSelector;
use crate::transport::Transport;

mod builder;
mod execute;

pub use builder::LoadBalancedClientBuilder;

const DEFAULT_USER_AGENT: &str = "reqx-lb";

/// Executes requests addressed to logical client names against their server pools.
///
/// One instance serves any number of logical clients and may be shared across threads. Each
/// call resolves its client's configuration once, then loops over select, rewrite, send and
/// classify until the retry coordinator reaches a terminal state.
pub struct LoadBalancedClient {
    resolver: ConfigResolver,
    directory: Arc<ServerDirectory>,
    selector: Arc<dyn ServerSelector>,
    transport: Arc<dyn Transport>,
    coordinator: RetryCoordinator,
    retryer: Retryer,
    status_policy: StatusPolicy,
    total_timeout: Option<Duration>,
    metrics: LoadBalancerMetrics,
}

impl std::fmt::Debug for LoadBalancedClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LoadBalancedClient")
            .field("directory", &self.directory)
            .field("retryer", &self.retryer)
            .field("status_policy", &self.status_policy)
            .field("total_timeout", &self.total_timeout)
            .finish_non_exhaustive()
    }
}

impl LoadBalancedClient {
    pub fn builder(config: Arc<dyn crate::config::ConfigSource>) -> LoadBalancedClientBuilder {
        LoadBalancedClientBuilder::new(config)
    }

    pub fn directory(&self) -> &Arc<ServerDirectory> {
        &self.directory
    }

    pub fn config_resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub fn retryer(&self) -> &Retryer {
        &self.retryer
    }

    pub fn metrics_snapshot(&self) -> LoadBalancerMetricsSnapshot {
        self.metrics.snapshot()
    }
}
