//! Transport trait and the request/response shapes it exchanges.

use crate::error::TransportResult;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// HTTP verbs the entity layer issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Returns the canonical upper-case verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response headers, kept with their names verbatim.
///
/// Lookup is case-insensitive since HTTP header names are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Creates an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns the first value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the value for `name` parsed as an integer.
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Path relative to the transport's base URL, including any querystring.
    pub path: String,
    pub body: Option<Value>,
}

impl Request {
    /// Creates a request without a body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    /// Attaches a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    /// Decoded JSON body; `Null` when the body was empty.
    pub data: Value,
}

impl Response {
    /// A 200 response carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            data,
        }
    }

    /// Replaces the status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Performs HTTP verbs against a base URL.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and waits for the response.
    async fn send(&self, request: Request) -> TransportResult<Response>;

    async fn get(&self, path: &str) -> TransportResult<Response> {
        self.send(Request::new(Method::Get, path)).await
    }

    async fn post(&self, path: &str, body: Value) -> TransportResult<Response> {
        self.send(Request::new(Method::Post, path).with_body(body)).await
    }

    async fn put(&self, path: &str, body: Value) -> TransportResult<Response> {
        self.send(Request::new(Method::Put, path).with_body(body)).await
    }

    async fn patch(&self, path: &str, body: Value) -> TransportResult<Response> {
        self.send(Request::new(Method::Patch, path).with_body(body)).await
    }

    async fn delete(&self, path: &str) -> TransportResult<Response> {
        self.send(Request::new(Method::Delete, path)).await
    }
}
