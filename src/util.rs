use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use http::header::{HeaderName, HeaderValue};

use crate::error::Error;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn read_unpoisoned<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn write_unpoisoned<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

/// Per-attempt timeout clipped to what is left of the call deadline, `None` once it has passed.
pub(crate) fn phase_timeout(
    per_attempt_timeout: Duration,
    total_timeout: Option<Duration>,
    call_started_at: Instant,
) -> Option<Duration> {
    let Some(total_timeout) = total_timeout else {
        return Some(per_attempt_timeout);
    };

    let elapsed = call_started_at.elapsed();
    if elapsed >= total_timeout {
        return None;
    }

    let remaining = total_timeout - elapsed;
    Some(per_attempt_timeout.min(remaining))
}

pub(crate) fn bounded_retry_delay(
    retry_delay: Duration,
    total_timeout: Option<Duration>,
    call_started_at: Instant,
) -> Option<Duration> {
    let Some(total_timeout) = total_timeout else {
        return Some(retry_delay);
    };

    let elapsed = call_started_at.elapsed();
    if elapsed >= total_timeout {
        return None;
    }

    let remaining = total_timeout - elapsed;
    if retry_delay >= remaining {
        return None;
    }
    Some(retry_delay)
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let without_query = || uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    // `url` would re-read the first path segment of `http:///a/b` as the host.
    let has_authority = uri_text
        .split_once("://")
        .is_some_and(|(_, rest)| !rest.starts_with('/'));
    if !has_authority {
        return without_query();
    }
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return without_query();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
