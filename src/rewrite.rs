//! Routing-name removal and endpoint substitution on request URIs.
//!
//! A load-balanced request is addressed to its logical client name, e.g.
//! `http://questions/questions/answer/123`. Before dispatch the name is dropped from the
//! authority ([`clean_url`]) and the selected server is put in its place ([`with_authority`]).

use crate::endpoint::Endpoint;
use crate::error::Error;

struct UriParts<'a> {
    scheme: &'a str,
    authority: &'a str,
    rest: &'a str,
}

fn split_uri(uri: &str) -> Result<UriParts<'_>, Error> {
    let invalid = || Error::InvalidUri {
        uri: uri.to_owned(),
    };
    let (scheme, after_scheme) = uri.split_once("://").ok_or_else(invalid)?;
    let scheme_is_valid = scheme
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'));
    if !scheme_is_valid {
        return Err(invalid());
    }

    let end = after_scheme
        .find(['/', '?', '#'])
        .unwrap_or(after_scheme.len());
    Ok(UriParts {
        scheme,
        authority: &after_scheme[..end],
        rest: &after_scheme[end..],
    })
}

fn authority_host(authority: &str) -> &str {
    let host_port = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host_port)| host_port);
    if let Some(bracketed) = host_port.strip_prefix('[') {
        return bracketed.split_once(']').map_or(bracketed, |(host, _)| host);
    }
    host_port
        .split_once(':')
        .map_or(host_port, |(host, _)| host)
}

/// Drops the client name from the authority of `uri`.
///
/// Only a host exactly equal to `client` is removed. The rest of the URI is kept byte for
/// byte, and any other URI is returned unchanged.
///
/// ```
/// use reqx_lb::rewrite::clean_url;
///
/// assert_eq!(
///     clean_url("http://questions/questions/answer/123", "questions").unwrap(),
///     "http:///questions/answer/123"
/// );
/// ```
pub fn clean_url(uri: &str, client: &str) -> Result<String, Error> {
    let parts = split_uri(uri)?;
    if authority_host(parts.authority) != client {
        return Ok(uri.to_owned());
    }
    Ok(format!("{}://{}", parts.scheme, parts.rest))
}

pub fn with_authority(uri: &str, endpoint: &Endpoint) -> Result<String, Error> {
    let parts = split_uri(uri)?;
    let rest = if parts.rest.is_empty() || !parts.rest.starts_with('/') {
        format!("/{}", parts.rest)
    } else {
        parts.rest.to_owned()
    };
    let rewritten = format!("{}://{}{}", parts.scheme, endpoint.authority(), rest);
    rewritten
        .parse::<http::Uri>()
        .map_err(|_| Error::InvalidUri {
            uri: rewritten.clone(),
        })?;
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::{clean_url, with_authority};
    use crate::endpoint::Endpoint;
    use crate::error::Error;

    #[test]
    fn collapses_client_name_host() {
        assert_eq!(
            clean_url("http://questions/questions/answer/123", "questions").expect("clean"),
            "http:///questions/answer/123"
        );
    }

    #[test]
    fn host_without_repeated_path_segment() {
        assert_eq!(
            clean_url("http://myservice/questions/answer/123", "myservice").expect("clean"),
            "http:///questions/answer/123"
        );
    }

    #[test]
    fn other_hosts_are_left_alone() {
        let uri = "http://other/questions/answer/123";
        assert_eq!(clean_url(uri, "questions").expect("clean"), uri);
    }

    #[test]
    fn query_and_fragment_survive() {
        assert_eq!(
            clean_url("https://questions/answer?id=7&q=a%20b#top", "questions").expect("clean"),
            "https:///answer?id=7&q=a%20b#top"
        );
    }

    #[test]
    fn client_name_with_port_is_collapsed() {
        assert_eq!(
            clean_url("http://questions:8080/answer", "questions").expect("clean"),
            "http:///answer"
        );
    }

    #[test]
    fn host_match_is_case_sensitive() {
        let uri = "http://Questions/answer";
        assert_eq!(clean_url(uri, "questions").expect("clean"), uri);
    }

    #[test]
    fn missing_scheme_is_invalid() {
        let error = clean_url("questions/answer/123", "questions").expect_err("no scheme");
        assert!(matches!(error, Error::InvalidUri { .. }));
    }

    #[test]
    fn endpoint_becomes_the_authority() {
        let endpoint = Endpoint::new("10.0.0.7", 8081);
        assert_eq!(
            with_authority("http:///questions/answer/123?a=b", &endpoint).expect("rewrite"),
            "http://10.0.0.7:8081/questions/answer/123?a=b"
        );
        assert_eq!(
            with_authority("http://stale:1/answer", &endpoint).expect("rewrite"),
            "http://10.0.0.7:8081/answer"
        );
    }

    #[test]
    fn ipv6_endpoint_and_empty_path() {
        let endpoint = Endpoint::new("::1", 9000);
        assert_eq!(
            with_authority("http://?x=1", &endpoint).expect("rewrite"),
            "http://[::1]:9000/?x=1"
        );
    }
}
