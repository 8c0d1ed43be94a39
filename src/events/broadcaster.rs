use tokio::sync::broadcast;

use crate::events::SessionEvent;

/// Fan-out of session events to every delivery surface.
///
/// A single channel carries all tenants, so every subscriber observes the
/// events of one session in the order they were emitted. Delivery is
/// best-effort: late subscribers miss earlier events and lagging ones skip.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event; having no subscriber is not an error.
    pub fn emit(&self, event: SessionEvent) {
        tracing::debug!(
            user_id = event.user_id(),
            event = event.event_type(),
            "emitting session event"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribes to one tenant's events, or to all of them with `None`.
    pub fn subscribe(&self, user_id: Option<&str>) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            user_id: user_id.map(ToOwned::to_owned),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Receiving side of [`EventBroadcaster::subscribe`].
pub struct EventSubscription {
    rx: broadcast::Receiver<SessionEvent>,
    user_id: Option<String>,
}

impl EventSubscription {
    /// Waits for the next matching event; `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, event: &SessionEvent) -> bool {
        self.user_id
            .as_deref()
            .is_none_or(|user_id| user_id == event.user_id())
    }
}
