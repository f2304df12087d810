//! Shared helpers for integration tests

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode},
    routing::any,
    Router,
};
use hookscope::{
    config::AppConfig, create_server_router, CapturedRequest, HubEvent, ServerState,
    SharedConfig,
};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// A request as seen by the downstream target
#[derive(Debug, Clone)]
pub struct Received {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Local HTTP server standing in for a forward target
pub struct Target {
    pub addr: SocketAddr,
    pub received: Arc<Mutex<Vec<Received>>>,
}

impl Target {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }
}

#[derive(Clone)]
struct TargetState {
    status: StatusCode,
    delay: Duration,
    received: Arc<Mutex<Vec<Received>>>,
}

async fn record_request(State(state): State<TargetState>, req: Request<Body>) -> StatusCode {
    let (parts, body) = req.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    state.received.lock().push(Received {
        method: parts.method,
        headers: parts.headers,
        body,
    });
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    state.status
}

/// Start a target answering every request with `status` after `delay`
pub async fn spawn_target(status: StatusCode, delay: Duration) -> Target {
    let received = Arc::new(Mutex::new(Vec::new()));
    let state = TargetState {
        status,
        delay,
        received: received.clone(),
    };
    let app = Router::new()
        .route("/", any(record_request))
        .route("/*path", any(record_request))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Target { addr, received }
}

pub fn test_state(config: AppConfig) -> Arc<ServerState> {
    Arc::new(ServerState::from_config(SharedConfig::new(config)).unwrap())
}

/// Send a request through the full router and return status plus JSON body
pub async fn call(
    state: &Arc<ServerState>,
    request: Request<Body>,
) -> (StatusCode, serde_json::Value) {
    let response = create_server_router(state.clone())
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub async fn capture(
    state: &Arc<ServerState>,
    channel_id: &str,
    method: Method,
    body: &str,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(format!("/capture/{}", channel_id))
        .body(Body::from(body.to_string()))
        .unwrap();
    call(state, request).await
}

pub fn stored(state: &ServerState, channel_id: &str) -> Vec<Arc<CapturedRequest>> {
    state.registry.list(channel_id)
}

/// Wait for the next forward-result event on a subscription
pub async fn next_forward_result(
    subscription: &mut hookscope::hub::Subscription,
) -> hookscope::ForwardOutcome {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match subscription.recv().await {
                Some(HubEvent::ForwardResult { outcome, .. }) => return outcome,
                Some(_) => continue,
                None => panic!("subscription closed"),
            }
        }
    })
    .await
    .expect("no forward result within 5s")
}

/// Serve the full router on an ephemeral local port
pub async fn serve(state: Arc<ServerState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_server_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Poll `condition` until it holds or 5s pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within 5s")
}
