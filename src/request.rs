use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;

use crate::LbResult;
use crate::error::Error;
use crate::transport::OutboundRequest;
use crate::util::{parse_header_name, parse_header_value};

/// A request addressed to a logical client, e.g. `http://questions/questions/answer/123`.
///
/// The same template is replayed for every attempt, so its body must be buffered.
#[derive(Clone, Debug)]
pub struct RequestTemplate {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestTemplate {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn put(uri: impl Into<String>) -> Self {
        Self::new(Method::PUT, uri)
    }

    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new(Method::DELETE, uri)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> LbResult<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    /// Appends a form-encoded query pair, ahead of any fragment.
    pub fn query_pair(mut self, name: &str, value: &str) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(name, value)
            .finish();
        let (base, fragment) = match self.uri.split_once('#') {
            Some((base, fragment)) => (base.to_owned(), Some(fragment.to_owned())),
            None => (self.uri.clone(), None),
        };
        let separator = if base.contains('?') { '&' } else { '?' };
        self.uri = match fragment {
            Some(fragment) => format!("{base}{separator}{encoded}#{fragment}"),
            None => format!("{base}{separator}{encoded}"),
        };
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json<T>(mut self, value: &T) -> LbResult<Self>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_vec(value).map_err(|source| Error::Serialize { source })?;
        self.body = Bytes::from(encoded);
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    pub(crate) fn to_outbound(&self, uri: String) -> OutboundRequest {
        OutboundRequest {
            method: self.method.clone(),
            uri,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}
