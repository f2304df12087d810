//! Broadcast hub
//!
//! Channel-keyed groups of live observers. Publishing never blocks: each
//! observer owns a bounded queue, and an observer whose queue is full or
//! whose receiver is gone is dropped from the hub.

use crate::capture::CapturedRequest;
use crate::forward::ForwardOutcome;
use crate::registry::ForwardStats;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

pub type SubscriberId = u64;

/// Event pushed to the observers of a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HubEvent {
    #[serde(rename_all = "camelCase")]
    NewRequest {
        channel_id: String,
        request: Arc<CapturedRequest>,
    },
    #[serde(rename_all = "camelCase")]
    Cleared { channel_id: String },
    #[serde(rename_all = "camelCase")]
    ForwardResult {
        channel_id: String,
        outcome: ForwardOutcome,
        stats: ForwardStats,
    },
}

impl HubEvent {
    pub fn channel_id(&self) -> &str {
        match self {
            HubEvent::NewRequest { channel_id, .. }
            | HubEvent::Cleared { channel_id }
            | HubEvent::ForwardResult { channel_id, .. } => channel_id,
        }
    }
}

#[derive(Debug)]
struct SubscriberEntry {
    tx: mpsc::Sender<HubEvent>,
    channels: HashSet<String>,
}

#[derive(Debug, Default)]
struct HubInner {
    subscribers: HashMap<SubscriberId, SubscriberEntry>,
    groups: HashMap<String, HashSet<SubscriberId>>,
}

#[derive(Debug)]
pub struct BroadcastHub {
    inner: RwLock<HubInner>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(HubInner::default()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new observer. It receives nothing until it joins a channel.
    pub fn connect(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        self.inner.write().subscribers.insert(
            id,
            SubscriberEntry {
                tx,
                channels: HashSet::new(),
            },
        );

        tracing::debug!(subscriber = id, "Observer connected");

        Subscription {
            id,
            rx,
            hub: self.clone(),
        }
    }

    /// Add an observer to a channel group. Returns false if the observer is
    /// no longer connected.
    pub fn join(&self, subscriber: SubscriberId, channel_id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.subscribers.get_mut(&subscriber) else {
            return false;
        };
        entry.channels.insert(channel_id.to_string());
        inner
            .groups
            .entry(channel_id.to_string())
            .or_default()
            .insert(subscriber);

        tracing::debug!(subscriber, channel_id = %channel_id, "Observer joined channel");
        true
    }

    pub fn leave(&self, subscriber: SubscriberId, channel_id: &str) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.subscribers.get_mut(&subscriber) {
            entry.channels.remove(channel_id);
        }
        remove_from_group(&mut inner.groups, channel_id, subscriber);
    }

    /// Remove an observer from every group it joined
    pub fn disconnect(&self, subscriber: SubscriberId) {
        let mut inner = self.inner.write();
        let Some(entry) = inner.subscribers.remove(&subscriber) else {
            return;
        };
        for channel_id in &entry.channels {
            remove_from_group(&mut inner.groups, channel_id, subscriber);
        }

        tracing::debug!(subscriber, "Observer disconnected");
    }

    /// Queue `event` for every observer of `channel_id`. Returns the number
    /// of observers it was queued for.
    pub fn publish(&self, channel_id: &str, event: HubEvent) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();

        {
            let inner = self.inner.read();
            let Some(group) = inner.groups.get(channel_id) else {
                return 0;
            };

            for id in group {
                let Some(entry) = inner.subscribers.get(id) else {
                    continue;
                };
                match entry.tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            subscriber = id,
                            channel_id = %channel_id,
                            "Observer queue full, dropping observer"
                        );
                        dropped.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => dropped.push(*id),
                }
            }
        }

        for id in dropped {
            self.disconnect(id);
        }

        delivered
    }

    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        self.inner
            .read()
            .groups
            .get(channel_id)
            .map_or(0, |group| group.len())
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().subscribers.len()
    }
}

fn remove_from_group(
    groups: &mut HashMap<String, HashSet<SubscriberId>>,
    channel_id: &str,
    subscriber: SubscriberId,
) {
    if let Some(group) = groups.get_mut(channel_id) {
        group.remove(&subscriber);
        if group.is_empty() {
            groups.remove(channel_id);
        }
    }
}

/// Receiving side of one observer. Dropping it disconnects the observer.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<HubEvent>,
    hub: Arc<BroadcastHub>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once the hub has dropped this observer
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<HubEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.disconnect(self.id);
    }
}

/// Shared broadcast hub
pub type SharedHub = Arc<BroadcastHub>;

pub fn create_shared_hub(queue_capacity: usize) -> SharedHub {
    Arc::new(BroadcastHub::new(queue_capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleared(channel_id: &str) -> HubEvent {
        HubEvent::Cleared {
            channel_id: channel_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_only_joined_channels_receive() {
        let hub = create_shared_hub(8);
        let mut abc = hub.connect();
        let mut other = hub.connect();

        assert!(hub.join(abc.id(), "abc"));
        assert!(hub.join(other.id(), "other"));

        assert_eq!(hub.publish("abc", cleared("abc")), 1);

        let event = abc.recv().await.unwrap();
        assert_eq!(event.channel_id(), "abc");
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = create_shared_hub(8);
        assert_eq!(hub.publish("nobody", cleared("nobody")), 0);
    }

    #[tokio::test]
    async fn test_drop_disconnects() {
        let hub = create_shared_hub(8);
        let subscription = hub.connect();
        hub.join(subscription.id(), "abc");
        assert_eq!(hub.subscriber_count("abc"), 1);

        drop(subscription);
        assert_eq!(hub.subscriber_count("abc"), 0);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.publish("abc", cleared("abc")), 0);
    }

    #[tokio::test]
    async fn test_slow_observer_is_dropped() {
        let hub = create_shared_hub(2);
        let mut slow = hub.connect();
        let mut fast = hub.connect();
        hub.join(slow.id(), "abc");
        hub.join(fast.id(), "abc");

        assert_eq!(hub.publish("abc", cleared("abc")), 2);
        fast.recv().await.unwrap();
        assert_eq!(hub.publish("abc", cleared("abc")), 2);
        fast.recv().await.unwrap();

        // slow has two queued events; the third overflows it
        assert_eq!(hub.publish("abc", cleared("abc")), 1);
        assert_eq!(hub.subscriber_count("abc"), 1);

        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());
        assert!(fast.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_leave_and_rejoin() {
        let hub = create_shared_hub(8);
        let mut sub = hub.connect();
        hub.join(sub.id(), "a");
        hub.join(sub.id(), "b");
        hub.leave(sub.id(), "a");

        assert_eq!(hub.publish("a", cleared("a")), 0);
        assert_eq!(hub.publish("b", cleared("b")), 1);
        assert_eq!(sub.recv().await.unwrap().channel_id(), "b");
    }

    #[test]
    fn test_join_unknown_subscriber() {
        let hub = create_shared_hub(8);
        assert!(!hub.join(42, "abc"));
        assert_eq!(hub.subscriber_count("abc"), 0);
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(cleared("abc")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "cleared", "channelId": "abc"}));
    }
}
