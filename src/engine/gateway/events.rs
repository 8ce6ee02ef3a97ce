// ── Gateway: Event Bus ─────────────────────────────────────────────────────
// Feedback between the gateway, health monitor, breakers, and queue travels
// over a broadcast channel instead of direct back-pointers, so no component
// holds a reference cycle. Losing events when nobody listens is fine — the
// bus is observability, not control flow.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayEvent {
    ProviderSucceeded { provider: String, latency_ms: u64 },
    ProviderFailed { provider: String, message: String },
    CircuitTransition { provider: String, from: &'static str, to: &'static str },
    AlertRaised { id: String, provider: String, alert: String, severity: String },
    AlertResolved { id: String, provider: String, alert: String },
    RequestQueued { id: String, retry_count: u32 },
    QueueRetried { id: String, success: bool },
    QueueDropped { id: String, retries: u32 },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    /// Fire-and-forget emit. A send error only means no subscribers.
    pub fn emit(&self, event: GatewayEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
