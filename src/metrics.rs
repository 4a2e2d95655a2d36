use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Error;
use crate::response::HttpResponse;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadBalancerMetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub attempts: u64,
    pub same_server_retries: u64,
    pub next_server_retries: u64,
    pub retryer_retries: u64,
    pub retries_exhausted: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    /// Status codes of every response received, including ones that were retried.
    pub status_counts: BTreeMap<u16, u64>,
    /// Terminal errors keyed by [`ErrorCode::as_str`](crate::ErrorCode::as_str).
    pub error_counts: BTreeMap<String, u64>,
    pub endpoint_attempts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct LoadBalancerMetrics {
    inner: Arc<LoadBalancerMetricsInner>,
}

#[derive(Debug, Default)]
struct LoadBalancerMetricsInner {
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    attempts: AtomicU64,
    same_server_retries: AtomicU64,
    next_server_retries: AtomicU64,
    retryer_retries: AtomicU64,
    retries_exhausted: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
    endpoint_attempts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    metrics: LoadBalancerMetrics,
}

impl LoadBalancerMetrics {
    pub(crate) fn record_request_started(&self) {
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub(crate) fn record_attempt(&self, endpoint: &str) {
        self.inner.attempts.fetch_add(1, Ordering::Relaxed);
        let mut endpoint_attempts = lock_unpoisoned(&self.inner.endpoint_attempts);
        *endpoint_attempts.entry(endpoint.to_owned()).or_insert(0) += 1;
    }

    pub(crate) fn record_status(&self, status: u16) {
        let mut status_counts = lock_unpoisoned(&self.inner.status_counts);
        *status_counts.entry(status).or_insert(0) += 1;
    }

    pub(crate) fn record_same_server_retry(&self) {
        self.inner
            .same_server_retries
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_next_server_retry(&self) {
        self.inner
            .next_server_retries
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retryer_retry(&self) {
        self.inner.retryer_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_completed(
        &self,
        result: &Result<HttpResponse, Error>,
        latency: Duration,
    ) {
        self.record_latency(latency);
        match result {
            Ok(_) => {
                self.inner
                    .requests_succeeded
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
                if matches!(error, Error::RetriesExhausted { .. }) {
                    self.inner.retries_exhausted.fetch_add(1, Ordering::Relaxed);
                }
                let mut error_counts = lock_unpoisoned(&self.inner.error_counts);
                *error_counts
                    .entry(error.code().as_str().to_owned())
                    .or_insert(0) += 1;
            }
        }
    }

    pub(crate) fn snapshot(&self) -> LoadBalancerMetricsSnapshot {
        let latency_samples = self.inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        LoadBalancerMetricsSnapshot {
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            attempts: self.inner.attempts.load(Ordering::Relaxed),
            same_server_retries: self.inner.same_server_retries.load(Ordering::Relaxed),
            next_server_retries: self.inner.next_server_retries.load(Ordering::Relaxed),
            retryer_retries: self.inner.retryer_retries.load(Ordering::Relaxed),
            retries_exhausted: self.inner.retries_exhausted.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&self.inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&self.inner.error_counts).clone(),
            endpoint_attempts: lock_unpoisoned(&self.inner.endpoint_attempts).clone(),
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::LoadBalancerMetrics;
    use crate::error::Error;

    #[test]
    fn in_flight_guard_decrements_on_drop() {
        let metrics = LoadBalancerMetrics::default();
        let guard = metrics.enter_in_flight();
        assert_eq!(metrics.snapshot().in_flight, 1);
        drop(guard);
        assert_eq!(metrics.snapshot().in_flight, 0);
    }

    #[test]
    fn failures_are_counted_by_error_code() {
        let metrics = LoadBalancerMetrics::default();
        let failure = Err(Error::NoServersAvailable {
            client: "questions".to_owned(),
        });
        metrics.record_request_completed(&failure, Duration::from_millis(4));
        metrics.record_attempt("10.0.0.1:80");
        metrics.record_attempt("10.0.0.1:80");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.error_counts.get("no_servers_available"), Some(&1));
        assert_eq!(snapshot.endpoint_attempts.get("10.0.0.1:80"), Some(&2));
        assert_eq!(snapshot.latency_avg_ms, 4.0);
    }
}
