use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::config::{MapConfigSource, RequestOptions, StatusPolicy, Timeouts};
use crate::endpoint::Endpoint;
use crate::error::{Error, ErrorCode, TransportErrorKind};
use crate::request::RequestTemplate;
use crate::response::HttpResponse;
use crate::retry::{AttemptOutcome, Retryer};
use crate::transport::{OutboundRequest, Transport, TransportError};
use crate::{LoadBalancedClient, LoadBalancedClientBuilder};

#[derive(Clone, Copy, Debug)]
enum Step {
    Status(u16),
    Io(TransportErrorKind),
    Timeout,
}

/// In-memory transport replaying a per-authority script; unscripted attempts answer 200.
#[derive(Default)]
struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    sent: Mutex<Vec<(String, Timeouts)>>,
}

impl ScriptedTransport {
    fn script(self, authority: &str, steps: &[Step]) -> Self {
        self.scripts
            .lock()
            .expect("scripts lock")
            .insert(authority.to_owned(), steps.iter().copied().collect());
        self
    }

    fn sent_uris(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .map(|(uri, _)| uri.clone())
            .collect()
    }

    fn sent_timeouts(&self) -> Vec<Timeouts> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .map(|(_, timeouts)| *timeouts)
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: &OutboundRequest,
        timeouts: Timeouts,
    ) -> Result<HttpResponse, TransportError> {
        self.sent
            .lock()
            .expect("sent lock")
            .push((request.uri.clone(), timeouts));
        let uri: http::Uri = request.uri.parse().expect("outbound uri should parse");
        let authority = uri.authority().expect("outbound authority").to_string();
        let step = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get_mut(&authority)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Status(200));

        match step {
            Step::Status(status) => Ok(HttpResponse::new(
                StatusCode::from_u16(status).expect("valid status"),
                HeaderMap::new(),
                Bytes::from(format!("{{\"served_by\":\"{authority}\",\"status\":{status}}}")),
            )),
            Step::Io(kind) => Err(TransportError::io(kind, "scripted failure")),
            Step::Timeout => Err(TransportError::Timeout),
        }
    }
}

fn config(properties: &[(&str, &str)]) -> Arc<MapConfigSource> {
    let source = MapConfigSource::new();
    for (key, value) in properties {
        source.set_property(*key, *value);
    }
    Arc::new(source)
}

fn builder(properties: &[(&str, &str)], transport: &Arc<ScriptedTransport>) -> LoadBalancedClientBuilder {
    LoadBalancedClient::builder(config(properties))
        .transport(transport.clone())
        .retryer(Retryer::never())
}

fn answer() -> RequestTemplate {
    RequestTemplate::get("http://questions/questions/answer/123")
}

#[test]
fn round_robin_spreads_calls_across_the_pool() {
    let transport = Arc::new(ScriptedTransport::default());
    let client = builder(
        &[("questions.listOfServers", "a:1,b:2,c:3")],
        &transport,
    )
    .build()
    .expect("client should build");

    let mut served: BTreeMap<Endpoint, usize> = BTreeMap::new();
    for _ in 0..6 {
        let response = client.execute("questions", answer()).expect("call should succeed");
        let endpoint = response.endpoint().expect("endpoint").clone();
        *served.entry(endpoint).or_default() += 1;
    }
    assert_eq!(served.len(), 3);
    assert!(served.values().all(|count| *count == 2));
}

#[test]
fn never_retryer_with_zero_budgets_makes_a_single_attempt() {
    let transport = Arc::new(
        ScriptedTransport::default().script("a:1", &[Step::Io(TransportErrorKind::Connect)]),
    );
    let client = builder(&[("questions.listOfServers", "a:1")], &transport)
        .build()
        .expect("client should build");

    let error = client
        .execute("questions", answer())
        .expect_err("io failure should surface");
    assert_eq!(error.code(), ErrorCode::RetriesExhausted);
    assert_eq!(error.history().expect("history").len(), 1);
    assert_eq!(
        error.last_attempt_error().expect("last error").code(),
        ErrorCode::Transport
    );
    assert_eq!(transport.sent_uris().len(), 1);
}

#[test]
fn standard_retryer_recovers_after_two_io_failures() {
    let transport = Arc::new(ScriptedTransport::default().script(
        "a:1",
        &[
            Step::Io(TransportErrorKind::Connect),
            Step::Io(TransportErrorKind::Read),
        ],
    ));
    let client = builder(&[("questions.listOfServers", "a:1")], &transport)
        .retryer(Retryer::standard().base_backoff(Duration::from_millis(1)))
        .build()
        .expect("client should build");

    let response = client
        .execute("questions", answer())
        .expect("third attempt should succeed");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.sent_uris().len(), 3);

    let metrics = client.metrics_snapshot();
    assert_eq!(metrics.retryer_retries, 2);
    assert_eq!(metrics.attempts, 3);
    assert_eq!(metrics.requests_succeeded, 1);
}

#[test]
fn same_server_budget_is_used_before_failing_over() {
    let io = Step::Io(TransportErrorKind::Connect);
    let transport = Arc::new(
        ScriptedTransport::default()
            .script("a:1", &[io, io])
            .script("b:2", &[io, io]),
    );
    let client = builder(
        &[
            ("questions.listOfServers", "a:1,b:2"),
            ("questions.sameServerMax", "1"),
            ("questions.nextServerMax", "1"),
        ],
        &transport,
    )
    .build()
    .expect("client should build");

    let error = client
        .execute("questions", answer())
        .expect_err("every attempt fails");
    let history = error.history().expect("history");
    let endpoints: Vec<String> = history
        .iter()
        .map(|record| record.endpoint.to_string())
        .collect();
    assert_eq!(endpoints, vec!["a:1", "a:1", "b:2", "b:2"]);
    assert_eq!(history.distinct_endpoints().len(), 2);

    let metrics = client.metrics_snapshot();
    assert_eq!(metrics.same_server_retries, 2);
    assert_eq!(metrics.next_server_retries, 1);
    assert_eq!(metrics.retries_exhausted, 1);
}

#[test]
fn failover_wraps_around_a_pool_smaller_than_the_budget() {
    let io = Step::Io(TransportErrorKind::Connect);
    let transport = Arc::new(
        ScriptedTransport::default()
            .script("a:1", &[io, io])
            .script("b:2", &[io, io]),
    );
    let client = builder(
        &[
            ("questions.listOfServers", "a:1,b:2"),
            ("questions.nextServerMax", "3"),
        ],
        &transport,
    )
    .build()
    .expect("client should build");

    let error = client
        .execute("questions", answer())
        .expect_err("every attempt fails");
    let history = error.history().expect("history");
    let endpoints: Vec<String> = history
        .iter()
        .map(|record| record.endpoint.to_string())
        .collect();
    assert_eq!(endpoints, vec!["a:1", "b:2", "a:1", "b:2"]);
    assert_eq!(history.len(), 4);
    assert_eq!(history.distinct_endpoints().len(), 2);
    assert_eq!(client.metrics_snapshot().next_server_retries, 3);
}

#[test]
fn throttled_statuses_fail_over_once_per_server() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .script("a:1", &[Step::Status(502)])
            .script("b:2", &[Step::Status(503)]),
    );
    let client = builder(
        &[
            ("questions.listOfServers", "a:1,b:2"),
            ("questions.nextServerMax", "1"),
            ("questions.throttledStatusCodes", "502,503"),
        ],
        &transport,
    )
    .build()
    .expect("client should build");

    let error = client
        .execute("questions", answer())
        .expect_err("both servers are throttled");
    let outcomes: Vec<AttemptOutcome> = error
        .history()
        .expect("history")
        .iter()
        .map(|record| record.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![
            AttemptOutcome::StatusFailure(502),
            AttemptOutcome::StatusFailure(503)
        ]
    );
    match error.last_attempt_error() {
        Some(Error::HttpStatus { status, endpoint, .. }) => {
            assert_eq!(*status, 503);
            assert_eq!(endpoint, &Endpoint::new("b", 2));
        }
        other => panic!("unexpected last error: {other:?}"),
    }
}

#[test]
fn non_throttled_status_is_terminal_despite_budget() {
    let transport =
        Arc::new(ScriptedTransport::default().script("a:1", &[Step::Status(500)]));
    let client = builder(
        &[
            ("questions.listOfServers", "a:1,b:2"),
            ("questions.sameServerMax", "2"),
            ("questions.nextServerMax", "3"),
        ],
        &transport,
    )
    .build()
    .expect("client should build");

    let error = client
        .execute("questions", answer())
        .expect_err("500 is not retried");
    match error {
        Error::HttpStatus { status, body, .. } => {
            assert_eq!(status, 500);
            assert!(body.contains("a:1"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.sent_uris().len(), 1);
}

#[test]
fn response_status_policy_returns_the_failed_response() {
    let transport =
        Arc::new(ScriptedTransport::default().script("a:1", &[Step::Status(404)]));
    let client = builder(&[("questions.listOfServers", "a:1")], &transport)
        .status_policy(StatusPolicy::Response)
        .build()
        .expect("client should build");

    let response = client
        .execute("questions", answer())
        .expect("status is handed back");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.endpoint(), Some(&Endpoint::new("a", 1)));
}

#[test]
fn missing_server_list_fails_before_any_attempt() {
    let transport = Arc::new(ScriptedTransport::default());
    let client = builder(&[], &transport)
        .build()
        .expect("client should build");

    let error = client
        .execute("questions", answer())
        .expect_err("no servers configured");
    assert_eq!(error.code(), ErrorCode::NoServersAvailable);
    assert!(transport.sent_uris().is_empty());
    assert_eq!(
        client.metrics_snapshot().error_counts.get("no_servers_available"),
        Some(&1)
    );
}

#[test]
fn call_deadline_stops_retryer_backoff() {
    let transport = Arc::new(
        ScriptedTransport::default().script("a:1", &[Step::Io(TransportErrorKind::Connect)]),
    );
    let client = builder(&[("questions.listOfServers", "a:1")], &transport)
        .retryer(Retryer::standard().base_backoff(Duration::from_secs(5)))
        .total_timeout(Duration::from_millis(200))
        .build()
        .expect("client should build");

    let error = client
        .execute("questions", answer())
        .expect_err("backoff exceeds the deadline");
    assert_eq!(error.code(), ErrorCode::DeadlineExceeded);
    assert_eq!(transport.sent_uris().len(), 1);
    let history = error.history().expect("attempts made before the deadline");
    assert_eq!(history.len(), 1);
    assert_eq!(
        history.last().map(|record| record.outcome),
        Some(AttemptOutcome::IoFailure(TransportErrorKind::Connect))
    );
}

#[test]
fn request_options_override_configured_timeouts() {
    let transport = Arc::new(ScriptedTransport::default());
    let client = builder(
        &[
            ("questions.listOfServers", "a:1"),
            ("questions.connectTimeoutMillis", "500"),
            ("questions.readTimeoutMillis", "900"),
        ],
        &transport,
    )
    .build()
    .expect("client should build");

    client.execute("questions", answer()).expect("call");
    client
        .execute_with_options("questions", answer(), &RequestOptions::new(1111, 22222))
        .expect("call");

    let timeouts = transport.sent_timeouts();
    assert_eq!(timeouts[0].connect, Duration::from_millis(500));
    assert_eq!(timeouts[0].read, Duration::from_millis(900));
    assert_eq!(timeouts[1].connect, Duration::from_millis(1111));
    assert_eq!(timeouts[1].read, Duration::from_millis(22222));
}

#[test]
fn outbound_uri_keeps_path_and_query() {
    let transport = Arc::new(ScriptedTransport::default());
    let client = builder(&[("questions.listOfServers", "10.0.0.1:8080")], &transport)
        .build()
        .expect("client should build");

    client
        .execute(
            "questions",
            RequestTemplate::get("http://questions/questions/answer/123?sort=desc")
                .query_pair("page", "2"),
        )
        .expect("call");
    assert_eq!(
        transport.sent_uris(),
        vec!["http://10.0.0.1:8080/questions/answer/123?sort=desc&page=2".to_owned()]
    );
}

#[test]
fn retryer_rounds_concatenate_history() {
    let io = Step::Io(TransportErrorKind::Connect);
    let transport = Arc::new(ScriptedTransport::default().script("a:1", &[io, io, io]));
    let client = builder(&[("questions.listOfServers", "a:1")], &transport)
        .retryer(
            Retryer::standard()
                .max_attempts(2)
                .base_backoff(Duration::from_millis(1)),
        )
        .build()
        .expect("client should build");

    let error = client
        .execute("questions", answer())
        .expect_err("both rounds fail");
    assert_eq!(error.history().expect("history").len(), 2);
    assert_eq!(client.metrics_snapshot().retryer_retries, 1);
}

#[test]
fn timeouts_are_retried_on_the_same_server() {
    let transport =
        Arc::new(ScriptedTransport::default().script("a:1", &[Step::Timeout]));
    let client = builder(
        &[
            ("questions.listOfServers", "a:1,b:2"),
            ("questions.sameServerMax", "1"),
        ],
        &transport,
    )
    .build()
    .expect("client should build");

    let response = client.execute("questions", answer()).expect("retry succeeds");
    assert_eq!(response.endpoint(), Some(&Endpoint::new("a", 1)));
    assert_eq!(
        transport.sent_uris(),
        vec![
            "http://a:1/questions/answer/123".to_owned(),
            "http://a:1/questions/answer/123".to_owned()
        ]
    );
}

#[test]
fn invalid_budget_is_a_configuration_error() {
    let transport = Arc::new(ScriptedTransport::default());
    let client = builder(
        &[
            ("questions.listOfServers", "a:1"),
            ("questions.sameServerMax", "-1"),
        ],
        &transport,
    )
    .build()
    .expect("client should build");

    let error = client
        .execute("questions", answer())
        .expect_err("negative budget");
    assert_eq!(error.code(), ErrorCode::InvalidConfig);
    assert!(transport.sent_uris().is_empty());
}

#[test]
fn concurrent_calls_share_the_round_robin_cursor() {
    let transport = Arc::new(ScriptedTransport::default());
    let client = Arc::new(
        builder(&[("questions.listOfServers", "a:1,b:2")], &transport)
            .build()
            .expect("client should build"),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for _ in 0..25 {
                    client.execute("questions", answer()).expect("call");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("caller thread");
    }

    let snapshot = client.metrics_snapshot();
    assert_eq!(snapshot.requests_succeeded, 100);
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.endpoint_attempts.get("a:1"), Some(&50));
    assert_eq!(snapshot.endpoint_attempts.get("b:2"), Some(&50));
}
