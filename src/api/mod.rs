//! Management API module
//!
//! Channel history, forward target configuration, replay and health.

use crate::capture::CapturedRequest;
use crate::error::ApiError;
use crate::forward::{self, validate_target, ForwardOutcome};
use crate::hub::HubEvent;
use crate::registry::ForwardStats;
use crate::server::ServerState;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Create the management API router
pub fn create_api_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route(
            "/channels/:channel_id/requests",
            get(list_requests).delete(clear_requests),
        )
        .route(
            "/channels/:channel_id/requests/:request_id/replay",
            post(replay_request),
        )
        .route(
            "/channels/:channel_id/forward",
            get(get_forward_config)
                .put(update_forward_config)
                .delete(delete_forward_config),
        )
        .route("/channels/:channel_id/forward/test", post(test_forward_target))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Channel history response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestsResponse {
    pub channel_id: String,
    pub requests: Vec<Arc<CapturedRequest>>,
    pub count: usize,
}

async fn list_requests(
    State(state): State<Arc<ServerState>>,
    Path(channel_id): Path<String>,
) -> Json<RequestsResponse> {
    let requests = state.registry.list(&channel_id);
    Json(RequestsResponse {
        count: requests.len(),
        channel_id,
        requests,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub success: bool,
    pub message: String,
}

/// Empty a channel's history and tell its observers, even if it was
/// already empty
async fn clear_requests(
    State(state): State<Arc<ServerState>>,
    Path(channel_id): Path<String>,
) -> Json<ClearResponse> {
    state.registry.clear(&channel_id);
    state.hub.publish(
        &channel_id,
        HubEvent::Cleared {
            channel_id: channel_id.clone(),
        },
    );

    tracing::info!(channel_id = %channel_id, "Requests cleared");

    Json(ClearResponse {
        success: true,
        message: "Requests cleared successfully".to_string(),
    })
}

/// Forward target and counters of a channel
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardConfigResponse {
    pub channel_id: String,
    pub target: Option<String>,
    pub stats: ForwardStats,
}

fn forward_config(state: &ServerState, channel_id: String) -> ForwardConfigResponse {
    ForwardConfigResponse {
        target: state.registry.forward_target(&channel_id),
        stats: state.registry.forward_stats(&channel_id),
        channel_id,
    }
}

async fn get_forward_config(
    State(state): State<Arc<ServerState>>,
    Path(channel_id): Path<String>,
) -> Json<ForwardConfigResponse> {
    Json(forward_config(&state, channel_id))
}

#[derive(Debug, Deserialize)]
pub struct UpdateForwardRequest {
    #[serde(default)]
    pub target: Option<String>,
}

async fn update_forward_config(
    State(state): State<Arc<ServerState>>,
    Path(channel_id): Path<String>,
    Json(req): Json<UpdateForwardRequest>,
) -> Result<Json<ForwardConfigResponse>, ApiError> {
    let target = match req.target.filter(|t| !t.trim().is_empty()) {
        Some(target) => {
            validate_target(&target)?;
            Some(target)
        }
        None => None,
    };

    tracing::info!(
        channel_id = %channel_id,
        forward_target = ?target,
        "Forward target updated"
    );
    state.registry.set_forward_target(&channel_id, target);

    Ok(Json(forward_config(&state, channel_id)))
}

async fn delete_forward_config(
    State(state): State<Arc<ServerState>>,
    Path(channel_id): Path<String>,
) -> Json<ForwardConfigResponse> {
    if state.registry.get(&channel_id).is_some() {
        state.registry.set_forward_target(&channel_id, None);
        tracing::info!(channel_id = %channel_id, "Forwarding disabled");
    }
    Json(forward_config(&state, channel_id))
}

/// Replay options
#[derive(Debug, Default, Deserialize)]
pub struct ReplayRequest {
    /// Override the channel's configured target
    #[serde(default)]
    pub target: Option<String>,
    /// Send under a new id and timestamp
    #[serde(default)]
    pub fresh: bool,
}

/// Forward one stored request on demand and report the outcome to the caller
async fn replay_request(
    State(state): State<Arc<ServerState>>,
    Path((channel_id, request_id)): Path<(String, String)>,
    body: Option<Json<ReplayRequest>>,
) -> Result<Json<ForwardOutcome>, ApiError> {
    let options = body.map(|Json(options)| options).unwrap_or_default();

    let channel = state
        .registry
        .get(&channel_id)
        .ok_or_else(|| ApiError::RequestNotFound {
            channel_id: channel_id.clone(),
            request_id: request_id.clone(),
        })?;
    let stored = channel
        .find(&request_id)
        .ok_or_else(|| ApiError::RequestNotFound {
            channel_id: channel_id.clone(),
            request_id: request_id.clone(),
        })?;

    let generation = channel.target_generation();
    let target = options
        .target
        .or_else(|| channel.forward_target())
        .ok_or_else(|| ApiError::NoForwardTarget(channel_id.clone()))?;
    validate_target(&target)?;

    let record = if options.fresh {
        stored.refreshed()
    } else {
        stored.as_ref().clone()
    };

    tracing::info!(
        channel_id = %channel_id,
        request_id = %request_id,
        fresh = options.fresh,
        "Replaying request"
    );

    let outcome = state.forwarder.forward(&channel_id, &record, &target).await;
    forward::report(&state.hub, &channel, &outcome, generation);

    Ok(Json(outcome))
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeRequest {
    #[serde(default)]
    pub target: Option<String>,
}

/// Send a test payload to a target without touching the counters
async fn test_forward_target(
    State(state): State<Arc<ServerState>>,
    Path(channel_id): Path<String>,
    body: Option<Json<ProbeRequest>>,
) -> Result<Json<ForwardOutcome>, ApiError> {
    let target = body
        .and_then(|Json(req)| req.target)
        .or_else(|| state.registry.forward_target(&channel_id))
        .ok_or_else(|| ApiError::NoForwardTarget(channel_id.clone()))?;
    validate_target(&target)?;

    Ok(Json(state.forwarder.probe(&channel_id, &target).await))
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub active_channels: usize,
    pub connections: usize,
    pub version: String,
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        active_channels: state.registry.channel_count(),
        connections: state.hub.connection_count(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
