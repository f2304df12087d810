//! Captured request codec
//!
//! Turns an inbound HTTP request into an immutable [`CapturedRequest`]. The
//! body is kept as the exact bytes received; it is never parsed or
//! re-encoded, whatever the content type claims.

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

/// Path prefix every capture URL starts with
pub const CAPTURE_MOUNT: &str = "/capture/";

/// Body as handed over by the transport layer
#[derive(Debug, Clone)]
pub enum RawBody {
    /// Bytes read off the wire before any content-type handling
    Bytes(Bytes),
    /// A body some upstream layer already parsed
    Parsed(serde_json::Value),
    /// No body
    Absent,
}

/// How `CapturedRequest::body` encodes the received bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Utf8,
    Base64,
}

impl BodyEncoding {
    fn is_utf8(&self) -> bool {
        *self == BodyEncoding::Utf8
    }
}

/// Immutable record of one inbound HTTP request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    /// Unique request ID
    pub id: String,
    /// HTTP method, verbatim
    pub method: String,
    /// Headers in arrival order; first occurrence wins
    pub headers: IndexMap<String, String>,
    /// Body text, or `None` when nothing was received
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "BodyEncoding::is_utf8")]
    pub body_encoding: BodyEncoding,
    pub query: IndexMap<String, String>,
    pub params: IndexMap<String, String>,
    /// Capture time in milliseconds since epoch
    pub timestamp: i64,
    /// Target relative to the capture mount
    pub url: String,
    /// Target as received
    pub original_url: String,
    pub content_type: String,
}

impl CapturedRequest {
    /// Build a record from transport-level request data.
    ///
    /// Never fails: an empty body, an unknown content type or an unparseable
    /// query string all still produce a valid record.
    pub fn from_parts(
        channel_id: &str,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: RawBody,
    ) -> Self {
        let (body, body_encoding) = encode_body(body);

        let mut header_map = IndexMap::with_capacity(headers.keys_len());
        for (name, value) in headers.iter() {
            header_map
                .entry(name.as_str().to_string())
                .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let content_type = header_map
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        let original_url = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());

        let mut params = IndexMap::new();
        params.insert("id".to_string(), channel_id.to_string());

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.as_str().to_string(),
            headers: header_map,
            body,
            body_encoding,
            query: parse_query(uri.query()),
            params,
            timestamp: chrono::Utc::now().timestamp_millis(),
            url: mount_relative_url(uri, &original_url),
            original_url,
            content_type,
        }
    }

    /// The exact bytes that were received, if any
    pub fn body_bytes(&self) -> Option<Vec<u8>> {
        let body = self.body.as_ref()?;
        match self.body_encoding {
            BodyEncoding::Utf8 => Some(body.as_bytes().to_vec()),
            BodyEncoding::Base64 => base64::decode(body).ok(),
        }
    }

    /// Number of body bytes received
    pub fn body_len(&self) -> usize {
        match (&self.body, self.body_encoding) {
            (None, _) => 0,
            (Some(body), BodyEncoding::Utf8) => body.len(),
            (Some(_), BodyEncoding::Base64) => self.body_bytes().map_or(0, |b| b.len()),
        }
    }

    /// Copy of this record under a new id and capture time
    pub fn refreshed(&self) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            ..self.clone()
        }
    }
}

fn encode_body(body: RawBody) -> (Option<String>, BodyEncoding) {
    match body {
        RawBody::Bytes(bytes) if bytes.is_empty() => (None, BodyEncoding::Utf8),
        RawBody::Bytes(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => (Some(text), BodyEncoding::Utf8),
            Err(_) => (Some(base64::encode(&bytes)), BodyEncoding::Base64),
        },
        RawBody::Parsed(serde_json::Value::Null) => (None, BodyEncoding::Utf8),
        RawBody::Parsed(serde_json::Value::String(text)) => (Some(text), BodyEncoding::Utf8),
        RawBody::Parsed(value) => (Some(value.to_string()), BodyEncoding::Utf8),
        RawBody::Absent => (None, BodyEncoding::Utf8),
    }
}

/// Query parameters in order of appearance; first occurrence wins.
fn parse_query(query: Option<&str>) -> IndexMap<String, String> {
    let pairs: Vec<(String, String)> = query
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();

    let mut params = IndexMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        params.entry(key).or_insert(value);
    }
    params
}

/// Raw channel segment and remainder of a `/capture/{id}[/...]` path
fn split_mount(path: &str) -> Option<(&str, &str)> {
    let tail = path.strip_prefix(CAPTURE_MOUNT)?;
    Some(match tail.find('/') {
        Some(idx) => tail.split_at(idx),
        None => (tail, ""),
    })
}

/// Channel id of a capture path, percent-decoded. Invalid UTF-8 is replaced
/// rather than rejected.
pub fn channel_id_from_path(path: &str) -> Option<String> {
    let (segment, _) = split_mount(path)?;
    Some(percent_decode_str(segment).decode_utf8_lossy().into_owned())
}

/// `/capture/abc/x?y=1` → `/x?y=1`, `/capture/abc?y=1` → `/?y=1`
fn mount_relative_url(uri: &Uri, original_url: &str) -> String {
    let Some((_, rest)) = split_mount(uri.path()) else {
        return original_url.to_string();
    };

    let mut url = if rest.is_empty() { "/".to_string() } else { rest.to_string() };
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }
    url
}
