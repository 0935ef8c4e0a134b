use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Writes every event to the log as structured JSON. The default sink when
/// no webhook fan-out is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: DomainEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(
                event = event.name(),
                merchant_id = %event.merchant_id(),
                %payload,
                "Event published"
            ),
            Err(e) => tracing::error!(event = event.name(), error = %e, "Event could not be serialized"),
        }
    }
}

/// In-process fan-out over a broadcast channel. Publishing with no
/// subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, event: DomainEvent) {
        tracing::debug!(event = event.name(), "Broadcasting event");
        let _ = self.sender.send(event);
    }
}
