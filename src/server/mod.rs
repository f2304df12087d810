//! HTTP Server module
//!
//! Wires the capture endpoint, management API and live subscription endpoint
//! into one router, and runs it.

use crate::api::create_api_router;
use crate::capture::{self, CapturedRequest, RawBody};
use crate::config::SharedConfig;
use crate::forward::{self, create_shared_forwarder, SharedForwarder};
use crate::hub::{create_shared_hub, HubEvent, SharedHub};
use crate::registry::{create_shared_registry, SharedRegistry};
use crate::ws::create_ws_router;
use axum::{
    body::Body,
    extract::State,
    http::{header, Request, Response},
    middleware::{self, Next},
    response::IntoResponse,
    routing::any,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// State shared by every handler
#[derive(Clone)]
pub struct ServerState {
    pub config: SharedConfig,
    pub registry: SharedRegistry,
    pub hub: SharedHub,
    pub forwarder: SharedForwarder,
}

impl ServerState {
    pub fn new(
        config: SharedConfig,
        registry: SharedRegistry,
        hub: SharedHub,
        forwarder: SharedForwarder,
    ) -> Self {
        Self {
            config,
            registry,
            hub,
            forwarder,
        }
    }

    /// Build registry, hub and forwarder from configuration
    pub fn from_config(config: SharedConfig) -> anyhow::Result<Self> {
        let app_config = config.get();
        let registry = create_shared_registry(app_config.retention.max_requests);
        let hub = create_shared_hub(app_config.broadcast.subscriber_queue);
        let forwarder = create_shared_forwarder(app_config.forward.timeout())?;
        Ok(Self::new(config, registry, hub, forwarder))
    }
}

/// Capture acknowledgement returned to the sender
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResponse {
    pub success: bool,
    pub message: String,
    pub request_id: String,
    pub timestamp: i64,
    pub method: String,
    pub body_length: usize,
}

/// Log the interesting request headers of inbound captures
pub async fn capture_log_middleware(req: Request<Body>, next: Next) -> Response<Body> {
    {
        let header_value = |name: header::HeaderName| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string()
        };

        tracing::debug!(
            method = %req.method(),
            uri = %req.uri(),
            origin = %header_value(header::ORIGIN),
            user_agent = %header_value(header::USER_AGENT),
            content_type = %header_value(header::CONTENT_TYPE),
            "Capture request"
        );
    }

    next.run(req).await
}

/// Ingest one request: record, retain, broadcast, and hand off to the
/// forwarder. Always answers 200.
/// The channel id is read from the raw path and decoded lossily.
async fn capture_handler(
    State(state): State<Arc<ServerState>>,
    req: Request<Body>,
) -> impl IntoResponse {
    let (parts, body) = req.into_parts();
    let channel_id = capture::channel_id_from_path(parts.uri.path()).unwrap_or_default();
    let max_body_bytes = state.config.server().max_body_bytes;

    let raw = match axum::body::to_bytes(body, max_body_bytes).await {
        Ok(bytes) => RawBody::Bytes(bytes),
        Err(e) => {
            tracing::warn!(
                channel_id = %channel_id,
                error = %e,
                "Body could not be read, capturing without it"
            );
            RawBody::Absent
        }
    };

    let record = Arc::new(CapturedRequest::from_parts(
        &channel_id,
        &parts.method,
        &parts.uri,
        &parts.headers,
        raw,
    ));
    let body_length = record.body_len();

    let channel = state.registry.append(&channel_id, record.clone());
    let observers = state.hub.publish(
        &channel_id,
        HubEvent::NewRequest {
            channel_id: channel_id.clone(),
            request: record.clone(),
        },
    );

    // Target is read once here; later changes do not affect this forward
    if let Some((target, generation)) = channel.forward_target_with_generation() {
        forward::dispatch(
            state.forwarder.clone(),
            state.hub.clone(),
            channel.clone(),
            record.clone(),
            target,
            generation,
        );
    }

    tracing::info!(
        channel_id = %channel_id,
        request_id = %record.id,
        method = %record.method,
        body_length,
        observers,
        "Request captured"
    );

    Json(CaptureResponse {
        success: true,
        message: "Webhook received successfully".to_string(),
        request_id: record.id.clone(),
        timestamp: record.timestamp,
        method: record.method.clone(),
        body_length,
    })
}

/// Create the main server router
pub fn create_server_router(state: Arc<ServerState>) -> Router {
    let capture_routes = Router::new()
        .route("/capture/:channel_id", any(capture_handler))
        .route("/capture/:channel_id/*rest", any(capture_handler))
        .route_layer(middleware::from_fn(capture_log_middleware))
        .with_state(state.clone());

    Router::new()
        .merge(capture_routes)
        .merge(create_api_router(state.clone()))
        .merge(create_ws_router(state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server and run until ctrl-c
pub async fn start_server(config: SharedConfig) -> anyhow::Result<()> {
    let server_config = config.server();
    let addr = format!("{}:{}", server_config.host, server_config.port);

    let state = Arc::new(ServerState::from_config(config)?);
    let app = create_server_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Starting HTTP server");
    tracing::info!("Capture endpoint: http://{}/capture/{{channel_id}}", addr);
    tracing::info!("Live subscriptions: ws://{}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, shutting down gracefully");
}
