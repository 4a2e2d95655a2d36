//! `reqx-lb` routes HTTP requests addressed to logical service names across a pool of servers,
//! retrying on the same server and failing over to the next one within per-service budgets.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use reqx_lb::prelude::{LoadBalancedClient, MapConfigSource, RequestTemplate, Retryer};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Answer {
//!     id: u64,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MapConfigSource::from_properties(
//!         "questions.listOfServers=10.0.0.1:8080,10.0.0.2:8080\n\
//!          questions.sameServerMax=1\n\
//!          questions.nextServerMax=1\n\
//!          questions.throttledStatusCodes=502,503\n",
//!     )?;
//!     let client = LoadBalancedClient::builder(Arc::new(config))
//!         .retryer(Retryer::never())
//!         .build()?;
//!
//!     let answer: Answer = client
//!         .execute(
//!             "questions",
//!             RequestTemplate::get("http://questions/questions/answer/123"),
//!         )?
//!         .json()?;
//!
//!     println!("answer id={}", answer.id);
//!     Ok(())
//! }
//! ```
//!
//! # Configuration Keys
//!
//! Every key is prefixed with the logical client name:
//!
//! - `listOfServers`: comma separated `host:port` entries.
//! - `sameServerMax` / `nextServerMax`: extra attempts on one server / extra servers (default 0).
//! - `throttledStatusCodes`: statuses retried like IO failures.
//! - `connectTimeoutMillis` / `readTimeoutMillis`: per-attempt timeouts (10s / 60s).

mod client;
mod config;
mod directory;
mod endpoint;
mod error;
mod metrics;
mod request;
mod response;
mod retry;
pub mod rewrite;
mod selector;
mod transport;
mod util;

pub use crate::client::{LoadBalancedClient, LoadBalancedClientBuilder};
pub use crate::config::{
    ClientConfig, ClientConfigKey, ConfigResolver, ConfigSource, MapConfigSource,
    OptionsClientConfig, RequestOptions, StatusPolicy, Timeouts,
};
pub use crate::directory::{DirectoryRefresher, ServerDirectory};
pub use crate::endpoint::{Endpoint, parse_server_list};
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
pub use crate::metrics::LoadBalancerMetricsSnapshot;
pub use crate::request::RequestTemplate;
pub use crate::response::HttpResponse;
pub use crate::retry::{
    AttemptHistory, AttemptOutcome, AttemptRecord, RequestContext, RetryBudget,
    RetryCoordinator, RetryState, Retryer, TerminalFailure,
};
pub use crate::selector::{RandomSelector, RoundRobinSelector, ServerSelector};
#[cfg(feature = "ureq-transport")]
pub use crate::transport::UreqTransport;
pub use crate::transport::{OutboundRequest, Transport, TransportError};

pub type LbResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Endpoint, Error, HttpResponse, LbResult, LoadBalancedClient, MapConfigSource,
        RequestOptions, RequestTemplate, Retryer, ServerDirectory, StatusPolicy,
    };
}

#[cfg(test)]
mod tests;
