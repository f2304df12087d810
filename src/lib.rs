//! hookscope - webhook capture, live inspection and forwarding
//!
//! A Rust application providing:
//! - Capture endpoint that records any HTTP request sent to a channel
//! - Bounded per-channel request history
//! - Live fan-out of captured requests over WebSocket
//! - Forwarding and on-demand replay to a downstream URL

pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod forward;
pub mod hub;
pub mod registry;
pub mod server;
pub mod store;
pub mod ws;

pub use capture::{CapturedRequest, RawBody};
pub use config::{AppConfig, SharedConfig};
pub use forward::{ForwardOutcome, Forwarder, SharedForwarder};
pub use hub::{BroadcastHub, HubEvent, SharedHub};
pub use registry::{ChannelRegistry, ForwardStats, SharedRegistry};
pub use server::{create_server_router, start_server, ServerState};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
