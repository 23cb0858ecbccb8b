//! Path and querystring helpers.
//!
//! Endpoints are path templates such as `/users/{user_id}/posts`; the
//! placeholders are filled from a JSON object of parameters.

use crate::error::{TransportError, TransportResult};
use serde_json::{Map, Value};

/// Renders a scalar JSON value the way it appears in a URL.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Encodes a query object as `k=v&k=v`.
///
/// Arrays repeat the key once per element and `null` values are skipped.
/// Keys are sorted so the same query always yields the same path.
pub fn encode_query(query: &Map<String, Value>) -> String {
    let mut entries: Vec<(&String, &Value)> = query.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut pairs = Vec::new();
    for (key, value) in entries {
        let key = urlencoding::encode(key);
        let values: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for v in values {
            if let Some(v) = scalar(v) {
                pairs.push(format!("{}={}", key, urlencoding::encode(&v)));
            }
        }
    }
    pairs.join("&")
}

/// Appends an encoded query to `path`; returns `path` unchanged when the
/// query encodes to nothing.
pub fn with_query(path: &str, query: &Map<String, Value>) -> String {
    let qs = encode_query(query);
    if qs.is_empty() {
        path.to_string()
    } else if path.contains('?') {
        format!("{path}&{qs}")
    } else {
        format!("{path}?{qs}")
    }
}

/// Fills `{name}` placeholders in an endpoint template.
pub fn interpolate(template: &str, params: &Map<String, Value>) -> TransportResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            TransportError::InvalidRequest(format!("unclosed placeholder in {template}"))
        })?;
        let name = &after[..end];
        let value = params.get(name).and_then(scalar).ok_or_else(|| {
            TransportError::InvalidRequest(format!("missing path parameter {name} for {template}"))
        })?;
        out.push_str(&urlencoding::encode(&value));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Path of one resource: `<endpoint>/<identity>`.
pub fn detail_path(endpoint: &str, identity: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), urlencoding::encode(identity))
}
