use crate::domain::events::LifecycleEvent;
use crate::domain::ports::NotificationPort;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 256;

/// Fans lifecycle events out to any number of subscribers.
///
/// Publishing never blocks and never fails: with no subscribers the event is
/// dropped, and slow subscribers observe `RecvError::Lagged`.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationPort for BroadcastNotifier {
    fn publish(&self, event: LifecycleEvent) {
        if self.sender.send(event).is_err() {
            trace!("no subscribers for lifecycle event");
        }
    }
}
