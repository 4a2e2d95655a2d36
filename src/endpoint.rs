use std::fmt;
use std::str::FromStr;

use crate::error::{Error, invalid_config};

const DEFAULT_PORT: u16 = 80;

/// A single server a logical client can be routed to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, with IPv6 literals bracketed so the result is usable as a URI authority.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.authority())
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(invalid_config("endpoint", raw, "empty server entry"));
        }

        if let Some(rest) = text.strip_prefix('[') {
            let Some((host, tail)) = rest.split_once(']') else {
                return Err(invalid_config("endpoint", raw, "unterminated ipv6 literal"));
            };
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(raw, port)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(invalid_config("endpoint", raw, "unexpected text after ipv6 literal")),
            };
            return Ok(Self::new(host, port));
        }

        match text.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.contains(':') => {
                Ok(Self::new(host, parse_port(raw, port)?))
            }
            Some(_) => Err(invalid_config("endpoint", raw, "malformed host:port")),
            None => Ok(Self::new(text, DEFAULT_PORT)),
        }
    }
}

fn parse_port(raw: &str, port: &str) -> Result<u16, Error> {
    port.parse::<u16>()
        .map_err(|_| invalid_config("endpoint", raw, format!("invalid port {port:?}")))
}

/// Parses a comma separated server list such as `"a:8080, b:8081"`; blank entries are skipped.
pub fn parse_server_list(raw: &str) -> Result<Vec<Endpoint>, Error> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse)
        .collect()
}
