//! A mock transport for testing.
//!
//! Routes are matched on `(method, path)` exactly, querystring included.
//! Unrouted requests answer `404`. Every request is recorded so tests can
//! assert how many network calls a code path issued.

use crate::error::{TransportError, TransportResult};
use crate::transport::{Method, Request, Response, Transport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

type Reply = TransportResult<Response>;

/// In-memory [`Transport`] with canned replies.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), Reply>>,
    calls: Mutex<Vec<Request>>,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every reply, so concurrent callers overlap in flight.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Answers `method path` with `response`.
    pub fn respond(&self, method: Method, path: impl Into<String>, response: Response) -> &Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((method, path.into()), Ok(response));
        self
    }

    /// Answers `method path` with a 200 carrying `data`.
    pub fn respond_json(&self, method: Method, path: impl Into<String>, data: Value) -> &Self {
        self.respond(method, path, Response::ok(data))
    }

    /// Answers `method path` with an error.
    pub fn fail(&self, method: Method, path: impl Into<String>, error: TransportError) -> &Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((method, path.into()), Err(error));
        self
    }

    /// Returns every request received so far, in order.
    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Counts requests matching `method path`.
    pub fn call_count(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    /// Total number of requests received.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Forgets the recorded calls, keeping the routes.
    pub fn reset_calls(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> TransportResult<Response> {
        let key = (request.method, request.path.clone());
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(request);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.routes.lock().unwrap_or_else(PoisonError::into_inner).get(&key) {
            Some(reply) => reply.clone(),
            None => Err(TransportError::Status {
                status: 404,
                body: json!({"detail": "not found"}),
            }),
        }
    }
}
