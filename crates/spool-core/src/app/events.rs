//! Event bus: broadcast fan-out of [`QueueEvent`]s.
//!
//! ## Rules
//! - `publish()` never blocks; events sent with no subscriber are dropped.
//! - A receiver only sees events published after it subscribed.
//! - Slow receivers get `RecvError::Lagged(n)` and skip the `n` oldest events.
//! - One publisher order: a task's `added` always precedes its outcome events.

use tokio::sync::broadcast;

use crate::domain::QueueEvent;

#[derive(Clone, Debug)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    /// Capacity is clamped to at least 1.
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn publish(&self, event: QueueEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Operation, TaskId};
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_see_events_in_publish_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(QueueEvent::Added {
            id: TaskId::new(1),
            payload: json!(1),
        });
        bus.publish(QueueEvent::Completed {
            id: TaskId::new(1),
            result: json!("ok"),
            payload: json!(1),
        });

        assert!(matches!(rx.recv().await.unwrap(), QueueEvent::Added { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            QueueEvent::Completed { .. }
        ));
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = EventBus::new(0);
        bus.publish(QueueEvent::Error {
            error: "nobody listening".into(),
            operation: Operation::Stats,
        });
    }
}
