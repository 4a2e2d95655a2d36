use http::Method;
use thiserror::Error;

use crate::endpoint::Endpoint;
use crate::retry::AttemptHistory;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Timeout,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Timeout => "timeout",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    NoServersAvailable,
    InvalidUri,
    InvalidConfig,
    InvalidHeaderName,
    InvalidHeaderValue,
    RequestBuild,
    SerializeJson,
    Transport,
    Timeout,
    HttpStatus,
    RetriesExhausted,
    DeadlineExceeded,
    Deserialize,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoServersAvailable => "no_servers_available",
            Self::InvalidUri => "invalid_uri",
            Self::InvalidConfig => "invalid_config",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::RequestBuild => "request_build",
            Self::SerializeJson => "serialize_json",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::HttpStatus => "http_status",
            Self::RetriesExhausted => "retries_exhausted",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Deserialize => "deserialize",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("no servers available for client {client}")]
    NoServersAvailable { client: String },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid configuration value for {key} ({value:?}): {message}")]
    InvalidConfig {
        key: String,
        value: String,
        message: String,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("failed to serialize request json: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("http transport error ({kind}) against {endpoint} for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        endpoint: Endpoint,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http request to {endpoint} timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        endpoint: Endpoint,
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("http status error {status} from {endpoint} for {method} {uri}: {body}")]
    HttpStatus {
        status: u16,
        endpoint: Endpoint,
        method: Method,
        uri: String,
        body: String,
    },
    #[error(
        "retries exhausted for client {client} after {attempts} attempts on {servers} servers: {method} {uri}",
        attempts = .history.len(),
        servers = .history.distinct_endpoints().len()
    )]
    RetriesExhausted {
        client: String,
        method: Method,
        uri: String,
        history: AttemptHistory,
        #[source]
        last_error: Box<Error>,
    },
    #[error("call deadline exceeded after {timeout_ms}ms for client {client}: {method} {uri}")]
    DeadlineExceeded {
        client: String,
        timeout_ms: u128,
        method: Method,
        uri: String,
        history: AttemptHistory,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NoServersAvailable { .. } => ErrorCode::NoServersAvailable,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::Serialize { .. } => ErrorCode::SerializeJson,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            Self::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
        }
    }

    /// Whether a caller-level [`Retryer`](crate::Retryer) may run the call again.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    pub fn history(&self) -> Option<&AttemptHistory> {
        match self {
            Self::RetriesExhausted { history, .. } | Self::DeadlineExceeded { history, .. } => {
                Some(history)
            }
            _ => None,
        }
    }

    /// The failure of the final attempt behind [`Error::RetriesExhausted`].
    pub fn last_attempt_error(&self) -> Option<&Error> {
        match self {
            Self::RetriesExhausted { last_error, .. } => Some(last_error),
            _ => None,
        }
    }
}

pub(crate) fn invalid_config(
    key: impl Into<String>,
    value: impl Into<String>,
    message: impl Into<String>,
) -> Error {
    Error::InvalidConfig {
        key: key.into(),
        value: value.into(),
        message: message.into(),
    }
}
