use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use meshflow_types::events::ViewerEvent;

/// Something that can fan a viewer event out to live connections.
///
/// Returns how many subscribers the event was handed to. Delivery is
/// at-most-once; a subscriber that falls behind loses events.
pub trait Publisher: Send + Sync {
    fn publish(&self, event: &ViewerEvent) -> Result<usize>;
}

/// Fans viewer events out to every connected viewer.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    /// Events are serialized once and shared by every receiver
    broadcast_tx: broadcast::Sender<Arc<str>>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(NotifierInner { broadcast_tx }),
        }
    }

    /// Subscribe to viewer events. Returns a broadcast receiver of JSON frames.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.inner.broadcast_tx.subscribe()
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

impl Publisher for Notifier {
    fn publish(&self, event: &ViewerEvent) -> Result<usize> {
        let json: Arc<str> = serde_json::to_string(event)?.into();
        // No subscribers is not a failure; nobody is watching.
        Ok(self.inner.broadcast_tx.send(json).unwrap_or(0))
    }
}
