//! Manager event stream.
//!
//! Listeners run synchronously under the manager lock in this
//! implementation, matching the reference behavior called out in
//! spec.md §9 ("Event delivery") — a production deployment with a slow
//! subscriber should wrap [`GatewayEvent`] delivery in its own
//! `tokio::spawn` rather than block the manager. We use a broadcast
//! channel (not a raw callback list) so CLI, Monitor, and test code can each
//! subscribe independently, the same shape `proxy`'s redis pubsub consumer
//! uses for console invalidation messages.

use tokio::sync::broadcast;

use super::EvictionReason;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    UserLoaded {
        user_id: String,
    },
    UserEvicted {
        user_id: String,
        reason: EvictionReason,
    },
    UserSuspended {
        user_id: String,
    },
    UserExpired {
        user_id: String,
    },
    ConfigSynced {
        count: usize,
        timestamp_epoch_ms: i64,
    },
    SyncFailed {
        error: String,
        consecutive_failures: u32,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    /// Best-effort publish: a channel with no subscribers is not an error,
    /// matching the "single consumer model acceptable" note in spec.md §4.4.
    pub fn publish(&self, event: GatewayEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(GatewayEvent::UserLoaded {
            user_id: "u-1".into(),
        });
        let event = rx.recv().await.unwrap();
        matches!(event, GatewayEvent::UserLoaded { user_id } if user_id == "u-1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(GatewayEvent::UserSuspended {
            user_id: "u-1".into(),
        });
    }
}
