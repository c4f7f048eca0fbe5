//! Best-effort operator notifications. Delivery failures are logged and dropped.

use async_trait::async_trait;
use tracing::{info, warn};
use crate::domain::events::DomainEvent;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &DomainEvent);
}

/// Used when no message bus is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &DomainEvent) {
        info!(topic = event.topic(), ?event, "notification");
    }
}

/// Publishes JSON-encoded events under `<prefix>.<topic>`.
#[derive(Clone, Debug)]
pub struct NatsNotifier {
    client: async_nats::Client,
    prefix: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self { Self { client, prefix: prefix.into() } }

    pub fn subject_for(&self, event: &DomainEvent) -> String { format!("{}.{}", self.prefix, event.topic()) }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn notify(&self, event: &DomainEvent) {
        let subject = self.subject_for(event);
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(subject = %subject, error = %e, "failed to encode notification");
                return;
            }
        };
        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            warn!(subject = %subject, error = %e, "notification dropped");
        }
    }
}
