//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{Error, RequestError};

/// An incoming HTTP request with its body fully buffered.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
}

impl Request {
    /// Builds a request from a method and a path with an optional `?query`.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), decode_query(query)),
            None => (target.to_owned(), Vec::new()),
        };
        Self {
            method,
            path,
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            params: HashMap::new(),
        }
    }

    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            path: parts.uri.path().to_owned(),
            query: parts.uri.query().map(decode_query).unwrap_or_default(),
            headers: parts.headers,
            body,
            params: HashMap::new(),
        }
    }

    /// Adds a header. Invalid names or values are dropped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/books/{id}`, `req.param("id")` on `/books/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// First value of a query-string parameter, percent-decoded.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Decodes the JSON body. Failures are `400` request errors.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::Request(RequestError::new(
                StatusCode::BAD_REQUEST,
                format!("payload not valid: {e}"),
            ))
        })
    }
}

/// `application/x-www-form-urlencoded` pairs in order. Malformed UTF-8 is
/// replaced rather than rejected, so decoding a pair list cannot fail.
fn decode_query(raw: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_path_and_query() {
        let req = Request::new(Method::GET, "/v1/books?page=2&rows=5&flag");
        assert_eq!(req.path(), "/v1/books");
        assert_eq!(req.query("page"), Some("2"));
        assert_eq!(req.query("rows"), Some("5"));
        assert_eq!(req.query("flag"), Some(""));
        assert_eq!(req.query("missing"), None);
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let req = Request::new(Method::GET, "/v1/books?page=%32&title=dune+messiah&isbn=978%2D0");
        assert_eq!(req.query("page"), Some("2"));
        assert_eq!(req.query("title"), Some("dune messiah"));
        assert_eq!(req.query("isbn"), Some("978-0"));
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = Request::new(Method::GET, "/").with_header("Authorization", "Bearer abc");
        assert_eq!(req.header("authorization"), Some("Bearer abc"));
    }

    #[test]
    fn bad_json_is_a_400() {
        let req = Request::new(Method::POST, "/").with_body("{not json");
        let err = req.json::<serde_json::Value>().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().starts_with("payload not valid"));
    }
}
