use std::thread::sleep;
use std::time::Instant;

use http::Method;
use tracing::{debug, info_span, warn};

use crate::LbResult;
use crate::config::{OptionsClientConfig, RequestOptions, StatusPolicy, Timeouts};
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::request::RequestTemplate;
use crate::response::HttpResponse;
use crate::retry::{AttemptHistory, AttemptOutcome, RequestContext, RetryState, TerminalFailure};
use crate::rewrite::{clean_url, with_authority};
use crate::transport::TransportError;
use crate::util::{bounded_retry_delay, phase_timeout, redact_uri_for_logs, truncate_body};

use super::LoadBalancedClient;

/// Identity of one logical call, carried into every error it can produce.
struct CallTarget<'a> {
    client: &'a str,
    method: Method,
    uri: String,
}

impl LoadBalancedClient {
    /// Sends `request` to one of the servers registered for `client`.
    ///
    /// `request` is addressed to the logical client name (`http://<client>/...`); the name is
    /// replaced by the selected endpoint on each attempt.
    pub fn execute(&self, client: &str, request: RequestTemplate) -> LbResult<HttpResponse> {
        self.run_call(client, &request, None)
    }

    /// Like [`execute`](Self::execute), with connect and read timeouts from `options` taking
    /// precedence over the client's configured ones.
    pub fn execute_with_options(
        &self,
        client: &str,
        request: RequestTemplate,
        options: &RequestOptions,
    ) -> LbResult<HttpResponse> {
        let overrides = OptionsClientConfig::new(options);
        self.run_call(client, &request, Some(&overrides))
    }

    fn run_call(
        &self,
        client: &str,
        request: &RequestTemplate,
        overrides: Option<&OptionsClientConfig>,
    ) -> LbResult<HttpResponse> {
        self.metrics.record_request_started();
        let _in_flight = self.metrics.enter_in_flight();
        let call_started_at = Instant::now();

        let result = self.run_rounds(client, request, overrides, call_started_at);
        self.metrics
            .record_request_completed(&result, call_started_at.elapsed());
        match &result {
            Ok(response) => debug!(
                client,
                status = response.status().as_u16(),
                elapsed_ms = call_started_at.elapsed().as_millis() as u64,
                "load-balanced call completed"
            ),
            Err(error) => debug!(
                client,
                code = error.code().as_str(),
                error = %error,
                "load-balanced call failed"
            ),
        }
        result
    }

    fn run_rounds(
        &self,
        client: &str,
        request: &RequestTemplate,
        overrides: Option<&OptionsClientConfig>,
        call_started_at: Instant,
    ) -> LbResult<HttpResponse> {
        let max_rounds = self.retryer.configured_max_attempts();
        let mut history = AttemptHistory::default();
        let mut round = 1;

        loop {
            let (method, uri, last_error) =
                match self.run_round(client, request, overrides, call_started_at) {
                    Err(Error::RetriesExhausted {
                        method,
                        uri,
                        history: round_history,
                        last_error,
                        ..
                    }) => {
                        history.append(round_history);
                        (method, uri, last_error)
                    }
                    Err(Error::DeadlineExceeded {
                        client,
                        timeout_ms,
                        method,
                        uri,
                        history: round_history,
                    }) => {
                        history.append(round_history);
                        return Err(Error::DeadlineExceeded {
                            client,
                            timeout_ms,
                            method,
                            uri,
                            history,
                        });
                    }
                    other => return other,
                };

            if round >= max_rounds {
                return Err(Error::RetriesExhausted {
                    client: client.to_owned(),
                    method,
                    uri,
                    history,
                    last_error,
                });
            }

            let retry_delay = self.retryer.backoff_for_retry(round);
            let Some(retry_delay) =
                bounded_retry_delay(retry_delay, self.total_timeout, call_started_at)
            else {
                return Err(self.deadline_exceeded(
                    &CallTarget {
                        client,
                        method,
                        uri,
                    },
                    history,
                ));
            };
            warn!(
                client,
                round,
                delay_ms = retry_delay.as_millis() as u64,
                error = %last_error,
                "retrying load-balanced call after exhausting server retries"
            );
            self.metrics.record_retryer_retry();
            if !retry_delay.is_zero() {
                sleep(retry_delay);
            }
            round += 1;
        }
    }

    fn run_round(
        &self,
        client: &str,
        request: &RequestTemplate,
        overrides: Option<&OptionsClientConfig>,
        call_started_at: Instant,
    ) -> LbResult<HttpResponse> {
        let mut config = self.resolver.resolve(client)?;
        if let Some(overrides) = overrides {
            config.timeouts = overrides.apply(config.timeouts);
        }
        let pool = self.directory.servers(client)?;
        let cleaned = clean_url(request.uri(), client)?;
        let target = CallTarget {
            client,
            method: request.method().clone(),
            uri: redact_uri_for_logs(&cleaned),
        };

        let mut context = RequestContext::new(client, config);
        let mut endpoint = self.selector.select(client, &pool, context.history())?;
        context.begin_server(endpoint.clone());

        loop {
            let span = info_span!(
                "reqx_lb.attempt",
                client,
                endpoint = %endpoint,
                attempt = context.history().len() + 1,
                server_slot = context.servers_tried()
            );
            let _enter = span.enter();

            let Some(timeouts) = self.attempt_timeouts(context.config().timeouts, call_started_at)
            else {
                return Err(self.deadline_exceeded(&target, context.into_history()));
            };
            let outbound = request.to_outbound(with_authority(&cleaned, &endpoint)?);
            self.metrics.record_attempt(&endpoint.to_string());
            debug!("sending request");

            let attempt_result = self.transport.send(&outbound, timeouts);
            let outcome = match &attempt_result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    self.metrics.record_status(status);
                    context.classify_status(status)
                }
                Err(error) => AttemptOutcome::IoFailure(error.kind()),
            };
            let state = self.coordinator.on_outcome(&mut context, outcome);

            let error = match (state, attempt_result) {
                (RetryState::Succeeded, Ok(response)) => {
                    debug!(status = response.status().as_u16(), "request succeeded");
                    return Ok(response.with_endpoint(endpoint));
                }
                (RetryState::FailedTerminal(TerminalFailure::NonRetryable), Ok(response)) => {
                    return self.non_retryable_status(response, endpoint, &target);
                }
                (_, Ok(response)) => status_error(&response, &endpoint, &target),
                (_, Err(error)) => transport_error(error, &endpoint, timeouts, &target),
            };

            match state {
                RetryState::RetrySameServer => {
                    warn!(error = %error, "retrying request on the same server");
                    self.metrics.record_same_server_retry();
                }
                RetryState::RetryNextServer => {
                    let next = self.selector.select(client, &pool, context.history())?;
                    warn!(error = %error, next = %next, "retrying request on the next server");
                    self.metrics.record_next_server_retry();
                    endpoint = next;
                    context.begin_server(endpoint.clone());
                }
                _ => {
                    return Err(Error::RetriesExhausted {
                        client: client.to_owned(),
                        method: target.method,
                        uri: target.uri,
                        history: context.into_history(),
                        last_error: Box::new(error),
                    });
                }
            }
        }
    }

    fn attempt_timeouts(&self, timeouts: Timeouts, call_started_at: Instant) -> Option<Timeouts> {
        Some(Timeouts {
            connect: phase_timeout(timeouts.connect, self.total_timeout, call_started_at)?,
            read: phase_timeout(timeouts.read, self.total_timeout, call_started_at)?,
        })
    }

    fn non_retryable_status(
        &self,
        response: HttpResponse,
        endpoint: Endpoint,
        target: &CallTarget<'_>,
    ) -> LbResult<HttpResponse> {
        match self.status_policy {
            StatusPolicy::Response => Ok(response.with_endpoint(endpoint)),
            StatusPolicy::Error => Err(status_error(&response, &endpoint, target)),
        }
    }

    fn deadline_exceeded(&self, target: &CallTarget<'_>, history: AttemptHistory) -> Error {
        Error::DeadlineExceeded {
            client: target.client.to_owned(),
            timeout_ms: self.total_timeout.unwrap_or_default().as_millis(),
            method: target.method.clone(),
            uri: target.uri.clone(),
            history,
        }
    }
}

fn status_error(response: &HttpResponse, endpoint: &Endpoint, target: &CallTarget<'_>) -> Error {
    Error::HttpStatus {
        status: response.status().as_u16(),
        endpoint: endpoint.clone(),
        method: target.method.clone(),
        uri: target.uri.clone(),
        body: truncate_body(response.body()),
    }
}

fn transport_error(
    error: TransportError,
    endpoint: &Endpoint,
    timeouts: Timeouts,
    target: &CallTarget<'_>,
) -> Error {
    match error {
        TransportError::Timeout => Error::Timeout {
            endpoint: endpoint.clone(),
            timeout_ms: timeouts.read.as_millis(),
            method: target.method.clone(),
            uri: target.uri.clone(),
        },
        TransportError::Io { kind, source } => Error::Transport {
            kind,
            endpoint: endpoint.clone(),
            method: target.method.clone(),
            uri: target.uri.clone(),
            source,
        },
    }
}
