//! Forwarding engine
//!
//! Re-emits a captured request to a downstream URL: same method, same body
//! bytes, same headers minus a fixed transport-specific set. Delivery is
//! at-most-once; a failed attempt is counted and logged, never retried.

use crate::capture::CapturedRequest;
use crate::hub::{HubEvent, SharedHub};
use crate::registry::Channel;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Value of the `X-Forwarded-By` header on every outbound request
pub const FORWARDED_BY: &str = "hookscope";

/// Headers never copied to the forwarded request
const EXCLUDED_HEADERS: &[&str] = &["host", "content-length", "connection", "upgrade"];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("invalid target URL {url}: {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Result of one forward attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardOutcome {
    pub request_id: String,
    pub target: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: f64,
}

/// True for headers dropped when forwarding
pub fn is_excluded_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    EXCLUDED_HEADERS.contains(&name.as_str()) || name.starts_with("sec-websocket-")
}

/// Outbound header list for `record`, in record order, followed by the
/// identification headers.
///
/// Names keep the record's casing here, but `HeaderName` lower-cases them
/// when the request is built, so the target always sees lower-case names.
pub fn forward_headers(channel_id: &str, record: &CapturedRequest) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = record
        .headers
        .iter()
        .filter(|(name, _)| !is_excluded_header(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    headers.push(("X-Forwarded-By".to_string(), FORWARDED_BY.to_string()));
    headers.push(("X-Original-Channel-Id".to_string(), channel_id.to_string()));
    headers.push((
        "X-Original-Timestamp".to_string(),
        record.timestamp.to_string(),
    ));
    headers.push(("X-Original-Method".to_string(), record.method.clone()));
    headers
}

/// Outbound body: never for GET/HEAD, otherwise the captured bytes
pub fn forward_body(record: &CapturedRequest) -> Option<Vec<u8>> {
    if record.method.eq_ignore_ascii_case("GET") || record.method.eq_ignore_ascii_case("HEAD") {
        return None;
    }
    record.body_bytes()
}

/// Parse a forward target, accepting only absolute http(s) URLs
pub fn validate_target(target: &str) -> Result<Url, ForwardError> {
    let url = Url::parse(target).map_err(|e| ForwardError::InvalidTarget {
        url: target.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ForwardError::InvalidTarget {
            url: target.to_string(),
            reason: format!("unsupported scheme '{}'", scheme),
        }),
    }
}

/// HTTP client wrapper performing forwards with a bounded timeout
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Replay `record` against `target` and report the outcome
    pub async fn forward(
        &self,
        channel_id: &str,
        record: &CapturedRequest,
        target: &str,
    ) -> ForwardOutcome {
        let start = Instant::now();
        let result = self.send(channel_id, record, target).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let outcome = outcome_from(record.id.clone(), target, result, latency_ms);

        if outcome.success {
            tracing::info!(
                channel_id = %channel_id,
                request_id = %record.id,
                url = %target,
                status = ?outcome.status,
                latency_ms = %latency_ms,
                "Forwarded request"
            );
        } else {
            tracing::warn!(
                channel_id = %channel_id,
                request_id = %record.id,
                url = %target,
                status = ?outcome.status,
                error = ?outcome.error,
                "Forward failed"
            );
        }

        outcome
    }

    async fn send(
        &self,
        channel_id: &str,
        record: &CapturedRequest,
        target: &str,
    ) -> Result<u16, ForwardError> {
        let url = validate_target(target)?;
        let method = Method::from_bytes(record.method.as_bytes())
            .map_err(|_| ForwardError::InvalidMethod(record.method.clone()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in forward_headers(channel_id, record) {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    // first occurrence wins, as in the record itself
                    headers.entry(name).or_insert(value);
                }
                _ => tracing::debug!(header = %name, "Skipping header not valid for forwarding"),
            }
        }

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = forward_body(record) {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        Ok(response.status().as_u16())
    }

    /// Send a synthetic JSON payload to `target` to check it is reachable
    pub async fn probe(&self, channel_id: &str, target: &str) -> ForwardOutcome {
        let start = Instant::now();
        let payload = serde_json::json!({
            "test": true,
            "message": "Test webhook from hookscope",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "channelId": channel_id,
        });

        let result = async {
            let url = validate_target(target)?;
            let response = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .header("X-Webhook-Test", "true")
                .header("X-Forwarded-By", FORWARDED_BY)
                .body(payload.to_string())
                .send()
                .await
                .map_err(|e| self.classify(e))?;
            Ok::<_, ForwardError>(response.status().as_u16())
        }
        .await;

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let outcome = outcome_from("probe".to_string(), target, result, latency_ms);

        tracing::info!(
            channel_id = %channel_id,
            url = %target,
            success = outcome.success,
            status = ?outcome.status,
            "Probed forward target"
        );

        outcome
    }

    fn classify(&self, error: reqwest::Error) -> ForwardError {
        if error.is_timeout() {
            ForwardError::Timeout(self.timeout)
        } else {
            ForwardError::Transport(error)
        }
    }
}

fn outcome_from(
    request_id: String,
    target: &str,
    result: Result<u16, ForwardError>,
    latency_ms: f64,
) -> ForwardOutcome {
    match result {
        Ok(status) => ForwardOutcome {
            request_id,
            target: target.to_string(),
            success: (200..300).contains(&status),
            status: Some(status),
            error: None,
            latency_ms,
        },
        Err(e) => ForwardOutcome {
            request_id,
            target: target.to_string(),
            success: false,
            status: None,
            error: Some(e.to_string()),
            latency_ms,
        },
    }
}

/// Count `outcome` against the channel and tell its observers.
///
/// `generation` is the target generation the forward was started under; a
/// result that outlived its target is still published but not counted.
pub fn report(hub: &SharedHub, channel: &Channel, outcome: &ForwardOutcome, generation: u64) {
    if !channel.record_forward(outcome.success, generation) {
        tracing::debug!(
            channel_id = %channel.id(),
            request_id = %outcome.request_id,
            "Forward target changed, result not counted"
        );
    }
    hub.publish(
        channel.id(),
        HubEvent::ForwardResult {
            channel_id: channel.id().to_string(),
            outcome: outcome.clone(),
            stats: channel.forward_stats(),
        },
    );
}

/// Forward on a separate task. The caller never waits on it; the handle is
/// only useful to tests.
pub fn dispatch(
    forwarder: SharedForwarder,
    hub: SharedHub,
    channel: Arc<Channel>,
    record: Arc<CapturedRequest>,
    target: String,
    generation: u64,
) -> JoinHandle<ForwardOutcome> {
    tokio::spawn(async move {
        let outcome = forwarder.forward(channel.id(), &record, &target).await;
        report(&hub, &channel, &outcome, generation);
        outcome
    })
}

/// Shared forwarder
pub type SharedForwarder = Arc<Forwarder>;

pub fn create_shared_forwarder(timeout: Duration) -> Result<SharedForwarder, ForwardError> {
    Ok(Arc::new(Forwarder::new(timeout)?))
}
