use bytes::Bytes;
use http::{HeaderMap, Method};
use thiserror::Error;

use crate::config::Timeouts;
use crate::error::TransportErrorKind;
use crate::response::HttpResponse;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One attempt's request, already addressed to a concrete endpoint.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Failure of a single round trip. Both variants count as retryable IO failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{kind} failure: {source}")]
    Io {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    #[error("timed out")]
    Timeout,
}

impl TransportError {
    pub fn io(
        kind: TransportErrorKind,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Io {
            kind,
            source: source.into(),
        }
    }

    pub const fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Io { kind, .. } => *kind,
            Self::Timeout => TransportErrorKind::Timeout,
        }
    }
}

/// Performs exactly one HTTP round trip. Must not retry or follow redirects on its own.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &OutboundRequest,
        timeouts: Timeouts,
    ) -> Result<HttpResponse, TransportError>;
}

#[cfg(feature = "ureq-transport")]
pub use self::ureq_transport::UreqTransport;

#[cfg(feature = "ureq-transport")]
mod ureq_transport {
    use std::io::Read;

    use bytes::Bytes;

    use super::{OutboundRequest, Transport, TransportError};
    use crate::config::Timeouts;
    use crate::error::TransportErrorKind;
    use crate::response::HttpResponse;

    const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;

    /// Blocking [`Transport`] on a shared `ureq` agent.
    ///
    /// Status codes are never turned into errors here; classification belongs to the retry
    /// coordinator.
    #[derive(Clone)]
    pub struct UreqTransport {
        agent: ureq::Agent,
        max_response_body_bytes: usize,
    }

    impl std::fmt::Debug for UreqTransport {
        fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter
                .debug_struct("UreqTransport")
                .field("max_response_body_bytes", &self.max_response_body_bytes)
                .finish_non_exhaustive()
        }
    }

    impl Default for UreqTransport {
        fn default() -> Self {
            Self::new("reqx-lb")
        }
    }

    impl UreqTransport {
        pub fn new(user_agent: &str) -> Self {
            let config = ureq::Agent::config_builder()
                .http_status_as_error(false)
                .user_agent(user_agent)
                .build();
            Self {
                agent: config.new_agent(),
                max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            }
        }

        pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
            self.max_response_body_bytes = max_response_body_bytes.max(1);
            self
        }

        fn read_body(
            &self,
            response: &mut ureq::http::Response<ureq::Body>,
        ) -> Result<Bytes, TransportError> {
            let mut reader = response.body_mut().as_reader();
            let mut collected = Vec::new();
            let mut chunk = [0_u8; 8192];

            loop {
                let read = reader.read(&mut chunk).map_err(map_body_read_error)?;
                if read == 0 {
                    break;
                }
                if collected.len().saturating_add(read) > self.max_response_body_bytes {
                    return Err(TransportError::io(
                        TransportErrorKind::Read,
                        format!(
                            "response body exceeds {} bytes",
                            self.max_response_body_bytes
                        ),
                    ));
                }
                collected.extend_from_slice(&chunk[..read]);
            }

            Ok(Bytes::from(collected))
        }
    }

    impl Transport for UreqTransport {
        fn send(
            &self,
            request: &OutboundRequest,
            timeouts: Timeouts,
        ) -> Result<HttpResponse, TransportError> {
            let mut builder = ureq::http::Request::builder()
                .method(request.method.clone())
                .uri(request.uri.as_str());
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            let built = builder
                .body(request.body.to_vec())
                .map_err(|source| TransportError::io(TransportErrorKind::Other, source))?;

            let configured = self
                .agent
                .configure_request(built)
                .timeout_connect(Some(timeouts.connect))
                .timeout_recv_response(Some(timeouts.read))
                .timeout_recv_body(Some(timeouts.read))
                .build();

            let mut response = self.agent.run(configured).map_err(map_ureq_error)?;
            let body = self.read_body(&mut response)?;
            let status = response.status();
            let headers = std::mem::take(response.headers_mut());
            Ok(HttpResponse::new(status, headers, body))
        }
    }

    fn map_ureq_error(error: ureq::Error) -> TransportError {
        match error {
            ureq::Error::Timeout(_) => TransportError::Timeout,
            other => TransportError::io(classify_ureq_transport_error(&other), other),
        }
    }

    fn map_body_read_error(error: std::io::Error) -> TransportError {
        let timed_out = error.kind() == std::io::ErrorKind::TimedOut
            || matches!(
                error
                    .get_ref()
                    .and_then(|source| source.downcast_ref::<ureq::Error>()),
                Some(ureq::Error::Timeout(_))
            );
        if timed_out {
            return TransportError::Timeout;
        }
        TransportError::io(TransportErrorKind::Read, error)
    }

    pub(crate) fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
        match error {
            ureq::Error::HostNotFound => TransportErrorKind::Dns,
            ureq::Error::Tls(_) => TransportErrorKind::Tls,
            ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
                TransportErrorKind::Connect
            }
            ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
            ureq::Error::Io(source) => match source.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    TransportErrorKind::Timeout
                }
                std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
                _ => TransportErrorKind::Other,
            },
            _ => TransportErrorKind::Other,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::TransportError;
    use crate::error::TransportErrorKind;

    #[test]
    fn timeout_reports_timeout_kind() {
        assert_eq!(TransportError::Timeout.kind(), TransportErrorKind::Timeout);
        let io = TransportError::io(TransportErrorKind::Connect, "refused");
        assert_eq!(io.kind(), TransportErrorKind::Connect);
        assert_eq!(io.to_string(), "connect failure: refused");
    }
}
