use crate::aggregate::UpdateBatch;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error};

/// Envelope for everything pushed to subscribers.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "message", rename_all = "camelCase")]
pub enum Message<'a> {
    UpdateServers(&'a UpdateBatch),
}

/// Delivers messages to subscribers. Fire-and-forget.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, message: Message<'_>);
}

/// Fans serialized messages out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<Arc<str>>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.sender.subscribe()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, message: Message<'_>) {
        let payload: Arc<str> = match serde_json::to_string(&message) {
            Ok(json) => json.into(),
            Err(err) => {
                error!(%err, "failed to serialize broadcast message");
                return;
            }
        };

        // No subscribers is normal
        if let Ok(receivers) = self.sender.send(payload) {
            debug!(receivers, "broadcast message");
        }
    }
}
