//! Domain events
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
}

impl DomainEvent {
    /// Subject suffix used when publishing, e.g. `order.placed`.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::SubmissionFailed { .. }) => "order.submission_failed",
            Self::Order(OrderEvent::Recovered { .. }) => "order.recovered",
            Self::Order(OrderEvent::Abandoned { .. }) => "order.abandoned",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: String, customer_name: String, total_amount: i64, item_count: u32 },
    /// Every payload shape was rejected; the order sits in the outbox.
    SubmissionFailed { reference: String, customer_name: String, total_amount: i64, attempts: usize },
    Recovered { reference: String, order_id: String },
    /// Retries ran out; the order moved to the dead-letter list.
    Abandoned { reference: String, customer_name: String, total_amount: i64, retries: u32 },
}
