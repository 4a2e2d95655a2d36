use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::endpoint::{Endpoint, parse_server_list};
use crate::error::{Error, invalid_config};
use crate::retry::RetryBudget;
use crate::util::{read_unpoisoned, write_unpoisoned};

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Read-only key-value view the resolver and the server directory query by client name.
pub trait ConfigSource: Send + Sync {
    fn get_property(&self, key: &str) -> Option<String>;
}

/// Thread-safe in-memory [`ConfigSource`].
#[derive(Debug, Default)]
pub struct MapConfigSource {
    properties: RwLock<BTreeMap<String, String>>,
}

impl MapConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `key=value` lines. Blank lines and lines starting with `#` or `!` are ignored.
    pub fn from_properties(text: &str) -> Result<Self, Error> {
        let mut properties = BTreeMap::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(invalid_config(line, "", "expected key=value"));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(invalid_config(line, value, "empty property key"));
            }
            properties.insert(key.to_owned(), value.trim().to_owned());
        }
        Ok(Self {
            properties: RwLock::new(properties),
        })
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        write_unpoisoned(&self.properties).insert(key.into(), value.into());
    }

    pub fn clear_property(&self, key: &str) {
        write_unpoisoned(&self.properties).remove(key);
    }

    pub fn properties(&self) -> BTreeMap<String, String> {
        read_unpoisoned(&self.properties).clone()
    }
}

impl ConfigSource for MapConfigSource {
    fn get_property(&self, key: &str) -> Option<String> {
        read_unpoisoned(&self.properties).get(key).cloned()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClientConfigKey {
    ListOfServers,
    ConnectTimeout,
    ReadTimeout,
    SameServerMax,
    NextServerMax,
    ThrottledStatusCodes,
}

impl ClientConfigKey {
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::ListOfServers => "listOfServers",
            Self::ConnectTimeout => "connectTimeoutMillis",
            Self::ReadTimeout => "readTimeoutMillis",
            Self::SameServerMax => "sameServerMax",
            Self::NextServerMax => "nextServerMax",
            Self::ThrottledStatusCodes => "throttledStatusCodes",
        }
    }

    pub fn key_for(self, client: &str) -> String {
        format!("{client}.{}", self.suffix())
    }
}

impl std::fmt::Display for ClientConfigKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.suffix())
    }
}

/// How a non-retryable, non-2xx response reaches the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatusPolicy {
    #[default]
    Error,
    Response,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Typed configuration for one logical client, resolved once per call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub timeouts: Timeouts,
    pub retry_budget: RetryBudget,
    pub throttled_status_codes: BTreeSet<u16>,
}

impl ClientConfig {
    pub fn is_throttled(&self, status: u16) -> bool {
        self.throttled_status_codes.contains(&status)
    }
}

#[derive(Clone)]
pub struct ConfigResolver {
    source: Arc<dyn ConfigSource>,
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("ConfigResolver").finish_non_exhaustive()
    }
}

impl ConfigResolver {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<dyn ConfigSource> {
        &self.source
    }

    pub fn resolve(&self, client: &str) -> Result<ClientConfig, Error> {
        let same_server_max = self
            .parsed::<u32>(client, ClientConfigKey::SameServerMax)?
            .unwrap_or(0);
        let next_server_max = self
            .parsed::<u32>(client, ClientConfigKey::NextServerMax)?
            .unwrap_or(0);
        let connect = self
            .parsed::<u64>(client, ClientConfigKey::ConnectTimeout)?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let read = self
            .parsed::<u64>(client, ClientConfigKey::ReadTimeout)?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_READ_TIMEOUT);

        let throttled_status_codes = match self.raw(client, ClientConfigKey::ThrottledStatusCodes) {
            Some((key, value)) => parse_status_codes(&key, &value)?,
            None => BTreeSet::new(),
        };

        Ok(ClientConfig {
            timeouts: Timeouts { connect, read },
            retry_budget: RetryBudget::new(same_server_max, next_server_max),
            throttled_status_codes,
        })
    }

    /// The configured server list, `None` when the client has no `listOfServers` entry.
    pub fn server_list(&self, client: &str) -> Result<Option<Vec<Endpoint>>, Error> {
        let Some((key, value)) = self.raw(client, ClientConfigKey::ListOfServers) else {
            return Ok(None);
        };
        parse_server_list(&value)
            .map(Some)
            .map_err(|error| match error {
                Error::InvalidConfig { message, .. } => invalid_config(key, value, message),
                other => other,
            })
    }

    fn raw(&self, client: &str, config_key: ClientConfigKey) -> Option<(String, String)> {
        let key = config_key.key_for(client);
        let value = self.source.get_property(&key)?;
        let value = value.trim().to_owned();
        if value.is_empty() {
            return None;
        }
        Some((key, value))
    }

    fn parsed<T: std::str::FromStr>(
        &self,
        client: &str,
        config_key: ClientConfigKey,
    ) -> Result<Option<T>, Error> {
        let Some((key, value)) = self.raw(client, config_key) else {
            return Ok(None);
        };
        value
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid_config(key, value.clone(), "expected a non-negative integer"))
    }
}

fn parse_status_codes(key: &str, value: &str) -> Result<BTreeSet<u16>, Error> {
    value
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| match code.parse::<u16>() {
            Ok(status) if (100..=599).contains(&status) => Ok(status),
            _ => Err(invalid_config(
                key,
                value,
                format!("invalid http status code {code:?}"),
            )),
        })
        .collect()
}

/// Connect/read timeouts a caller attaches to a single call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestOptions {
    connect_timeout_millis: u64,
    read_timeout_millis: u64,
}

impl RequestOptions {
    pub const fn new(connect_timeout_millis: u64, read_timeout_millis: u64) -> Self {
        Self {
            connect_timeout_millis,
            read_timeout_millis,
        }
    }

    pub const fn connect_timeout_millis(&self) -> u64 {
        self.connect_timeout_millis
    }

    pub const fn read_timeout_millis(&self) -> u64 {
        self.read_timeout_millis
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            DEFAULT_READ_TIMEOUT.as_millis() as u64,
        )
    }
}

/// [`RequestOptions`] translated into the resolver's key space: exactly a connect and a read
/// timeout entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionsClientConfig {
    properties: BTreeMap<ClientConfigKey, u64>,
}

impl OptionsClientConfig {
    pub fn new(options: &RequestOptions) -> Self {
        let properties = BTreeMap::from([
            (
                ClientConfigKey::ConnectTimeout,
                options.connect_timeout_millis(),
            ),
            (ClientConfigKey::ReadTimeout, options.read_timeout_millis()),
        ]);
        Self { properties }
    }

    pub fn get(&self, key: ClientConfigKey) -> Option<u64> {
        self.properties.get(&key).copied()
    }

    pub fn properties(&self) -> &BTreeMap<ClientConfigKey, u64> {
        &self.properties
    }

    pub(crate) fn apply(&self, timeouts: Timeouts) -> Timeouts {
        Timeouts {
            connect: self
                .get(ClientConfigKey::ConnectTimeout)
                .map(Duration::from_millis)
                .unwrap_or(timeouts.connect),
            read: self
                .get(ClientConfigKey::ReadTimeout)
                .map(Duration::from_millis)
                .unwrap_or(timeouts.read),
        }
    }
}

impl From<RequestOptions> for OptionsClientConfig {
    fn from(options: RequestOptions) -> Self {
        Self::new(&options)
    }
}
