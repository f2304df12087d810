//! Channel registry
//!
//! Process-wide map from channel id to that channel's history, forward target
//! and forwarding counters. The map lock only guards lookup and insertion;
//! each channel serializes its own history mutations.

use crate::capture::CapturedRequest;
use crate::store::History;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Forwarding outcome counters for one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardStats {
    pub success: u64,
    pub failed: u64,
}

/// Forward target plus a generation bumped on every change, so results of
/// forwards dispatched to an earlier target can be told apart.
#[derive(Debug, Default)]
struct TargetSlot {
    url: Option<String>,
    generation: u64,
}

/// State of a single channel
#[derive(Debug)]
pub struct Channel {
    id: String,
    history: Mutex<History>,
    forward_target: RwLock<TargetSlot>,
    forwarded_ok: AtomicU64,
    forwarded_failed: AtomicU64,
}

impl Channel {
    fn new(id: String, max_requests: usize) -> Self {
        Self {
            id,
            history: Mutex::new(History::new(max_requests)),
            forward_target: RwLock::new(TargetSlot::default()),
            forwarded_ok: AtomicU64::new(0),
            forwarded_failed: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn append(&self, record: Arc<CapturedRequest>) {
        self.history.lock().append(record);
    }

    pub fn list(&self) -> Vec<Arc<CapturedRequest>> {
        self.history.lock().list()
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }

    pub fn find(&self, request_id: &str) -> Option<Arc<CapturedRequest>> {
        self.history.lock().find(request_id)
    }

    pub fn forward_target(&self) -> Option<String> {
        self.forward_target.read().url.clone()
    }

    /// Current target generation
    pub fn target_generation(&self) -> u64 {
        self.forward_target.read().generation
    }

    /// Target and its generation, read together
    pub fn forward_target_with_generation(&self) -> Option<(String, u64)> {
        let slot = self.forward_target.read();
        slot.url.clone().map(|url| (url, slot.generation))
    }

    /// Replace the forward target. Counters restart when the target changes.
    pub fn set_forward_target(&self, target: Option<String>) {
        let mut slot = self.forward_target.write();
        if slot.url != target {
            slot.generation += 1;
            self.forwarded_ok.store(0, Ordering::Relaxed);
            self.forwarded_failed.store(0, Ordering::Relaxed);
        }
        slot.url = target;
    }

    /// Count a forward result against the counters of `generation`.
    ///
    /// Returns `false` and counts nothing when the target has changed since
    /// that generation.
    pub fn record_forward(&self, success: bool, generation: u64) -> bool {
        // read lock held so a concurrent reset cannot interleave
        let slot = self.forward_target.read();
        if slot.generation != generation {
            return false;
        }
        if success {
            self.forwarded_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.forwarded_failed.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    pub fn forward_stats(&self) -> ForwardStats {
        ForwardStats {
            success: self.forwarded_ok.load(Ordering::Relaxed),
            failed: self.forwarded_failed.load(Ordering::Relaxed),
        }
    }
}

/// Registry of all channels seen by this process
#[derive(Debug)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    max_requests: usize,
}

impl ChannelRegistry {
    pub fn new(max_requests: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            max_requests,
        }
    }

    /// Existing channel, or a new empty one
    pub fn ensure(&self, channel_id: &str) -> Arc<Channel> {
        if let Some(channel) = self.channels.read().get(channel_id) {
            return channel.clone();
        }

        self.channels
            .write()
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(channel_id = %channel_id, "Channel created");
                Arc::new(Channel::new(channel_id.to_string(), self.max_requests))
            })
            .clone()
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<Channel>> {
        self.channels.read().get(channel_id).cloned()
    }

    pub fn append(&self, channel_id: &str, record: Arc<CapturedRequest>) -> Arc<Channel> {
        let channel = self.ensure(channel_id);
        channel.append(record);
        channel
    }

    /// History of a channel, empty when the channel is unknown
    pub fn list(&self, channel_id: &str) -> Vec<Arc<CapturedRequest>> {
        self.get(channel_id)
            .map(|channel| channel.list())
            .unwrap_or_default()
    }

    pub fn clear(&self, channel_id: &str) {
        if let Some(channel) = self.get(channel_id) {
            channel.clear();
        }
    }

    pub fn find(&self, channel_id: &str, request_id: &str) -> Option<Arc<CapturedRequest>> {
        self.get(channel_id)?.find(request_id)
    }

    pub fn set_forward_target(&self, channel_id: &str, target: Option<String>) {
        self.ensure(channel_id).set_forward_target(target);
    }

    pub fn forward_target(&self, channel_id: &str) -> Option<String> {
        self.get(channel_id)?.forward_target()
    }

    pub fn forward_stats(&self, channel_id: &str) -> ForwardStats {
        self.get(channel_id)
            .map(|channel| channel.forward_stats())
            .unwrap_or_default()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}

/// Shared channel registry
pub type SharedRegistry = Arc<ChannelRegistry>;

pub fn create_shared_registry(max_requests: usize) -> SharedRegistry {
    Arc::new(ChannelRegistry::new(max_requests))
}
