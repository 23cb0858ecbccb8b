//! reqwest-backed transport.

use crate::error::{TransportError, TransportResult};
use crate::transport::{Headers, Method, Request, Response, Transport};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Base URL every request path is appended to (e.g. `https://api.example.com/v1`).
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Headers sent with every request (e.g. `Authorization`).
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
            default_headers: BTreeMap::new(),
        }
    }
}

/// Transport that issues real HTTP requests with reqwest.
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

impl HttpTransport {
    /// Creates a transport from its configuration.
    pub fn new(config: &HttpConfig) -> TransportResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Returns the base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

fn decode_body(text: &str) -> TransportResult<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| TransportError::Decode(e.to_string()))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> TransportResult<Response> {
        let url = self.url(&request.path);
        debug!("{} {}", request.method, url);

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers: Headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let text = response.text().await?;

        if !status.is_success() {
            warn!("{} {} failed with {}", request.method, url, status);
            let body = decode_body(&text).unwrap_or(Value::String(text));
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Response {
            status: status.as_u16(),
            headers,
            data: decode_body(&text)?,
        })
    }
}
