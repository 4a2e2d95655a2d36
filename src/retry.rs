use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;

use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::TransportErrorKind;

/// Additional attempts allowed beyond the first, on the same server and across servers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryBudget {
    same_server_max: u32,
    next_server_max: u32,
}

impl RetryBudget {
    pub const fn new(same_server_max: u32, next_server_max: u32) -> Self {
        Self {
            same_server_max,
            next_server_max,
        }
    }

    pub const fn same_server_max(&self) -> u32 {
        self.same_server_max
    }

    pub const fn next_server_max(&self) -> u32 {
        self.next_server_max
    }

    pub const fn max_attempts(&self) -> u64 {
        (self.same_server_max as u64 + 1) * (self.next_server_max as u64 + 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success(u16),
    IoFailure(TransportErrorKind),
    StatusFailure(u16),
}

impl AttemptOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptRecord {
    pub endpoint: Endpoint,
    pub outcome: AttemptOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttemptHistory {
    records: Vec<AttemptRecord>,
}

impl AttemptHistory {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AttemptRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.records.last()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.records.iter().any(|record| &record.endpoint == endpoint)
    }

    pub fn attempts_on(&self, endpoint: &Endpoint) -> usize {
        self.records
            .iter()
            .filter(|record| &record.endpoint == endpoint)
            .count()
    }

    pub fn distinct_endpoints(&self) -> Vec<Endpoint> {
        let mut seen = BTreeSet::new();
        let mut endpoints = Vec::new();
        for record in &self.records {
            if seen.insert(&record.endpoint) {
                endpoints.push(record.endpoint.clone());
            }
        }
        endpoints
    }

    pub(crate) fn push(&mut self, record: AttemptRecord) {
        self.records.push(record);
    }

    pub(crate) fn append(&mut self, other: AttemptHistory) {
        self.records.extend(other.records);
    }
}

impl<'a> IntoIterator for &'a AttemptHistory {
    type Item = &'a AttemptRecord;
    type IntoIter = std::slice::Iter<'a, AttemptRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalFailure {
    Exhausted,
    NonRetryable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryState {
    Attempting,
    RetrySameServer,
    RetryNextServer,
    Succeeded,
    FailedTerminal(TerminalFailure),
}

impl RetryState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal(_))
    }
}

/// Per-call retry state. Never shared between calls.
///
/// Call [`begin_server`](Self::begin_server) before the first outcome and after every
/// [`RetryState::RetryNextServer`].
#[derive(Clone, Debug)]
pub struct RequestContext {
    client: String,
    config: ClientConfig,
    state: RetryState,
    current: Option<Endpoint>,
    same_server_attempts: u32,
    servers_tried: u32,
    history: AttemptHistory,
}

impl RequestContext {
    pub fn new(client: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            client: client.into(),
            config,
            state: RetryState::Attempting,
            current: None,
            same_server_attempts: 0,
            servers_tried: 0,
            history: AttemptHistory::default(),
        }
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn budget(&self) -> RetryBudget {
        self.config.retry_budget
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn current_endpoint(&self) -> Option<&Endpoint> {
        self.current.as_ref()
    }

    pub fn same_server_attempts(&self) -> u32 {
        self.same_server_attempts
    }

    pub fn servers_tried(&self) -> u32 {
        self.servers_tried
    }

    pub fn history(&self) -> &AttemptHistory {
        &self.history
    }

    pub fn into_history(self) -> AttemptHistory {
        self.history
    }

    // Throttled membership wins over 2xx.
    pub fn classify_status(&self, status: u16) -> AttemptOutcome {
        if self.config.is_throttled(status) {
            AttemptOutcome::StatusFailure(status)
        } else if (200..300).contains(&status) {
            AttemptOutcome::Success(status)
        } else {
            AttemptOutcome::StatusFailure(status)
        }
    }

    pub fn begin_server(&mut self, endpoint: Endpoint) {
        self.current = Some(endpoint);
        self.same_server_attempts = 0;
        self.servers_tried = self.servers_tried.saturating_add(1);
        self.state = RetryState::Attempting;
    }

    // An outcome reported before any server was begun still uses up the first server slot;
    // it is counted against the budgets but has no endpoint to record in the history.
    fn record(&mut self, outcome: AttemptOutcome) {
        self.servers_tried = self.servers_tried.max(1);
        self.same_server_attempts = self.same_server_attempts.saturating_add(1);
        if let Some(endpoint) = self.current.clone() {
            self.history.push(AttemptRecord { endpoint, outcome });
        }
    }
}

/// Drains the same-server budget before the next-server budget. With `sameServerMax = 1` and
/// `nextServerMax = 1` a call makes at most four attempts, two per server.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryCoordinator;

impl RetryCoordinator {
    pub fn on_outcome(&self, context: &mut RequestContext, outcome: AttemptOutcome) -> RetryState {
        context.record(outcome);
        let state = match outcome {
            AttemptOutcome::Success(_) => RetryState::Succeeded,
            AttemptOutcome::StatusFailure(status) if !context.config.is_throttled(status) => {
                RetryState::FailedTerminal(TerminalFailure::NonRetryable)
            }
            AttemptOutcome::IoFailure(_) | AttemptOutcome::StatusFailure(_) => {
                let budget = context.budget();
                if context.same_server_attempts < budget.same_server_max.saturating_add(1) {
                    RetryState::RetrySameServer
                } else if context.servers_tried < budget.next_server_max.saturating_add(1) {
                    RetryState::RetryNextServer
                } else {
                    RetryState::FailedTerminal(TerminalFailure::Exhausted)
                }
            }
        };
        context.state = state;
        state
    }
}

/// Caller-level retry around a whole load-balanced call. Only exhausted budgets start a new
/// round, and every round resolves configuration again.
#[derive(Clone, Debug)]
pub struct Retryer {
    max_attempts: usize,
    base_backoff: Duration,
    max_backoff: Duration,
    jitter_ratio: f64,
}

impl Retryer {
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            jitter_ratio: 0.0,
        }
    }

    pub fn standard() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            jitter_ratio: 0.0,
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff.max(Duration::from_millis(1));
        if self.max_backoff < self.base_backoff {
            self.max_backoff = self.base_backoff;
        }
        self
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.base_backoff);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn configured_max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub(crate) fn backoff_for_retry(&self, retry_index: usize) -> Duration {
        let capped_exponent = retry_index.saturating_sub(1).min(31) as u32;
        let multiplier = 1_u128 << capped_exponent;
        let base_ms = self.base_backoff.as_millis().max(1);
        let max_ms = self.max_backoff.as_millis().max(base_ms);
        let delay_ms = base_ms
            .saturating_mul(multiplier)
            .min(max_ms)
            .min(u64::MAX as u128) as u64;
        self.apply_jitter(Duration::from_millis(delay_ms))
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }
        let max_backoff_ms = self.max_backoff.as_millis().min(u64::MAX as u128) as u64;

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        let sampled_ms = rng.random_range(low..=high).min(max_backoff_ms.max(1));
        Duration::from_millis(sampled_ms)
    }
}

impl Default for Retryer {
    fn default() -> Self {
        Self::standard()
    }
}
