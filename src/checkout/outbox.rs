//! Orders the store refused, kept until a later attempt gets them in.
//!
//! The outbox is a JSON array under [`PENDING_ORDERS_KEY`]. Entries decode one
//! at a time, so a damaged entry never hides the ones around it, and content
//! that is not an array is copied to a side key before anything overwrites it.
//! Orders that run out of retries and entries that never decode are moved to
//! [`DEAD_ORDERS_KEY`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;
use crate::checkout::{OrderSubmitter, SubmissionOutcome};
use crate::domain::aggregates::OrderDraft;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::storage::{DurableStorage, StorageError};

pub const PENDING_ORDERS_KEY: &str = "pending-orders";
pub const DEAD_ORDERS_KEY: &str = "pending-orders.dead";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParkedOrder {
    #[serde(flatten)]
    pub draft: OrderDraft,
    /// Failed retries, not counting the checkout that parked it.
    #[serde(default)]
    pub retries: u32,
}

enum Blob {
    Entries(Vec<Value>),
    Unreadable(String),
}

fn read_blob<S: DurableStorage + ?Sized>(storage: &S, key: &str) -> Result<Blob, StorageError> {
    let Some(raw) = storage.get(key)? else {
        return Ok(Blob::Entries(Vec::new()));
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(entries)) => Ok(Blob::Entries(entries)),
        _ => Ok(Blob::Unreadable(raw)),
    }
}

/// Current entries of `key`, ready to be rewritten. Unreadable content is
/// copied to `<key>.unreadable.<uuid>` first; a failed read is an error.
fn entries_for_write<S: DurableStorage + ?Sized>(storage: &mut S, key: &str) -> Result<Vec<Value>, StorageError> {
    match read_blob(&*storage, key)? {
        Blob::Entries(entries) => Ok(entries),
        Blob::Unreadable(raw) => {
            let aside = format!("{key}.unreadable.{}", Uuid::new_v4());
            storage.set(&aside, &raw)?;
            error!(key, aside = %aside, "outbox content unreadable, moved aside");
            Ok(Vec::new())
        }
    }
}

fn write_entries<S: DurableStorage + ?Sized>(storage: &mut S, key: &str, entries: &[Value]) -> Result<(), StorageError> {
    if entries.is_empty() {
        return storage.remove(key);
    }
    storage.set(key, &serde_json::to_string(entries)?)
}

fn decode(entry: &Value) -> Result<ParkedOrder, serde_json::Error> { ParkedOrder::deserialize(entry) }

/// Parked orders that decode. Undecodable entries are skipped, not removed.
pub fn load_pending<S: DurableStorage + ?Sized>(storage: &S) -> Vec<ParkedOrder> {
    let entries = match read_blob(storage, PENDING_ORDERS_KEY) {
        Ok(Blob::Entries(entries)) => entries,
        Ok(Blob::Unreadable(_)) => {
            warn!("pending order outbox is not a JSON array");
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "pending order outbox unreadable");
            return Vec::new();
        }
    };
    entries
        .iter()
        .filter_map(|entry| match decode(entry) {
            Ok(parked) => Some(parked),
            Err(e) => {
                warn!(error = %e, "skipping undecodable outbox entry");
                None
            }
        })
        .collect()
}

pub fn enqueue_pending<S: DurableStorage + ?Sized>(storage: &mut S, draft: OrderDraft) -> Result<(), StorageError> {
    let mut entries = entries_for_write(storage, PENDING_ORDERS_KEY)?;
    entries.push(serde_json::to_value(ParkedOrder { draft, retries: 0 })?);
    write_entries(storage, PENDING_ORDERS_KEY, &entries)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub recovered: Vec<Uuid>,
    pub failed: Vec<Uuid>,
    pub abandoned: Vec<Uuid>,
}

/// Offers each parked order to the store again. An order rejected on its
/// `max_retries`-th retry is reported abandoned and operators are told.
pub async fn retry_pending(parked: &[ParkedOrder], submitter: &OrderSubmitter, max_retries: u32) -> RetryReport {
    let mut report = RetryReport::default();
    for p in parked {
        let reference = p.draft.reference;
        match submitter.place(&p.draft).await {
            SubmissionOutcome::Placed { order_id, .. } => {
                info!(reference = %reference, order_id = %order_id, "parked order recovered");
                let event = DomainEvent::Order(OrderEvent::Recovered { reference: reference.to_string(), order_id });
                submitter.notifier().notify(&event).await;
                report.recovered.push(reference);
            }
            SubmissionOutcome::Rejected { .. } if p.retries.saturating_add(1) >= max_retries => {
                error!(reference = %reference, retries = p.retries + 1, "parked order abandoned");
                let event = DomainEvent::Order(OrderEvent::Abandoned {
                    reference: reference.to_string(),
                    customer_name: p.draft.shipping.customer_name.clone(),
                    total_amount: p.draft.total_amount,
                    retries: p.retries.saturating_add(1),
                });
                submitter.notifier().notify(&event).await;
                report.abandoned.push(reference);
            }
            SubmissionOutcome::Rejected { attempts } => {
                warn!(reference = %reference, attempts, retries = p.retries + 1, "parked order still rejected");
                report.failed.push(reference);
            }
        }
    }
    report
}

/// Writes a retry round back: recovered orders leave, failed ones count one
/// more retry, abandoned and undecodable entries move to [`DEAD_ORDERS_KEY`].
/// Orders parked while the round ran are kept as they are.
pub fn settle_pending<S: DurableStorage + ?Sized>(storage: &mut S, report: &RetryReport) -> Result<(), StorageError> {
    let entries = entries_for_write(storage, PENDING_ORDERS_KEY)?;
    let mut keep = Vec::with_capacity(entries.len());
    let mut dead = Vec::new();
    for entry in entries {
        let Ok(mut parked) = decode(&entry) else {
            dead.push(entry);
            continue;
        };
        let reference = parked.draft.reference;
        if report.recovered.contains(&reference) {
            continue;
        }
        if report.abandoned.contains(&reference) {
            dead.push(entry);
        } else if report.failed.contains(&reference) {
            parked.retries = parked.retries.saturating_add(1);
            keep.push(serde_json::to_value(parked)?);
        } else {
            keep.push(entry);
        }
    }
    // Dead letters first: a failure after this point duplicates, never loses.
    if !dead.is_empty() {
        let mut letters = entries_for_write(storage, DEAD_ORDERS_KEY)?;
        letters.extend(dead);
        write_entries(storage, DEAD_ORDERS_KEY, &letters)?;
    }
    write_entries(storage, PENDING_ORDERS_KEY, &keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::tests::{RecordingNotifier, SchemaStore};
    use crate::checkout::submit_order;
    use crate::domain::aggregates::{Cart, LineSelection, Product, ShippingForm};
    use crate::domain::discount::ShippingPolicy;
    use crate::storage::{CartSession, MemoryStorage, CART_STORAGE_KEY};
    use std::sync::Arc;

    fn form() -> ShippingForm {
        ShippingForm {
            customer_name: "Yuki".into(),
            phone: "080 1111 2222".into(),
            email: Some("yuki@example.com".into()),
            postal_code: "5300001".into(),
            address: "大阪市北区梅田1-1".into(),
            notes: None,
        }
    }

    fn draft() -> OrderDraft {
        let mut cart = Cart::new();
        cart.add(Product::new("P9", "ミックス", 450), 1, LineSelection::default());
        OrderDraft::build(&cart, form(), &ShippingPolicy::default()).unwrap()
    }

    fn raw_entries(storage: &MemoryStorage, key: &str) -> Vec<Value> {
        storage.get(key).unwrap().map(|raw| serde_json::from_str(&raw).unwrap()).unwrap_or_default()
    }

    fn down() -> OrderSubmitter {
        OrderSubmitter::new(Arc::new(SchemaStore::rejecting_everything()), Arc::new(RecordingNotifier::default()))
    }

    #[test]
    fn test_bad_entry_does_not_cost_the_others() {
        let mut storage = MemoryStorage::new();
        enqueue_pending(&mut storage, draft()).unwrap();
        enqueue_pending(&mut storage, draft()).unwrap();
        let mut entries = raw_entries(&storage, PENDING_ORDERS_KEY);
        entries.push(serde_json::json!({"reference": "not-a-uuid"}));
        storage.set(PENDING_ORDERS_KEY, &serde_json::to_string(&entries).unwrap()).unwrap();

        assert_eq!(load_pending(&storage).len(), 2);
        enqueue_pending(&mut storage, draft()).unwrap();
        assert_eq!(raw_entries(&storage, PENDING_ORDERS_KEY).len(), 4);
        assert_eq!(load_pending(&storage).len(), 3);
    }

    /// Remembers every key written.
    #[derive(Default)]
    struct KeyLog {
        inner: MemoryStorage,
        written: Vec<String>,
    }

    impl DurableStorage for KeyLog {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> { self.inner.get(key) }
        fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
            self.written.push(key.to_string());
            self.inner.set(key, value)
        }
        fn remove(&mut self, key: &str) -> Result<(), StorageError> { self.inner.remove(key) }
    }

    #[test]
    fn test_unreadable_outbox_moved_aside_before_write() {
        let mut storage = KeyLog::default();
        storage.inner.set(PENDING_ORDERS_KEY, "{oops").unwrap();
        assert!(load_pending(&storage).is_empty());

        enqueue_pending(&mut storage, draft()).unwrap();
        assert_eq!(load_pending(&storage).len(), 1);
        let aside = storage.written.iter().find(|k| k.starts_with("pending-orders.unreadable.")).unwrap();
        assert_eq!(storage.get(aside).unwrap().as_deref(), Some("{oops"));
        assert_eq!(storage.written.last().map(String::as_str), Some(PENDING_ORDERS_KEY));
    }

    #[tokio::test]
    async fn test_parked_order_recovered_later() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut session = CartSession::hydrate(MemoryStorage::new(), CART_STORAGE_KEY);
        session.add(Product::new("P9", "ミックス", 450), 2, LineSelection::default());
        assert_eq!(submit_order(&mut session, form(), &down(), &ShippingPolicy::default()).await.unwrap(), None);

        let parked = load_pending(session.storage());
        assert_eq!(parked.len(), 1);

        let store = Arc::new(SchemaStore::pinned());
        let up = OrderSubmitter::new(store.clone(), notifier.clone());
        let report = retry_pending(&parked, &up, 3).await;
        assert_eq!(report.recovered, vec![parked[0].draft.reference]);
        settle_pending(session.storage_mut(), &report).unwrap();

        assert!(load_pending(session.storage()).is_empty());
        assert!(session.storage().get(PENDING_ORDERS_KEY).unwrap().is_none());
        assert_eq!(store.orders.lock().unwrap()[0]["id"], serde_json::json!(parked[0].draft.reference.to_string()));
        let events = notifier.events.lock().unwrap();
        assert!(matches!(events.last(), Some(DomainEvent::Order(OrderEvent::Recovered { .. }))));
    }

    #[tokio::test]
    async fn test_retries_counted_then_abandoned() {
        let mut storage = MemoryStorage::new();
        enqueue_pending(&mut storage, draft()).unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let down = OrderSubmitter::new(Arc::new(SchemaStore::rejecting_everything()), notifier.clone());

        let report = retry_pending(&load_pending(&storage), &down, 2).await;
        assert_eq!(report.failed.len(), 1);
        settle_pending(&mut storage, &report).unwrap();
        assert_eq!(load_pending(&storage)[0].retries, 1);

        let report = retry_pending(&load_pending(&storage), &down, 2).await;
        assert_eq!(report.abandoned.len(), 1);
        settle_pending(&mut storage, &report).unwrap();
        assert!(load_pending(&storage).is_empty());
        assert_eq!(raw_entries(&storage, DEAD_ORDERS_KEY).len(), 1);
        let events = notifier.events.lock().unwrap();
        assert!(matches!(events.last(), Some(DomainEvent::Order(OrderEvent::Abandoned { retries: 2, .. }))));
    }

    #[tokio::test]
    async fn test_settle_keeps_orders_parked_mid_round() {
        let mut storage = MemoryStorage::new();
        enqueue_pending(&mut storage, draft()).unwrap();
        let report = retry_pending(&load_pending(&storage), &down(), 10).await;

        enqueue_pending(&mut storage, draft()).unwrap();
        let mut entries = raw_entries(&storage, PENDING_ORDERS_KEY);
        entries.push(serde_json::json!({"reference": "not-a-uuid"}));
        storage.set(PENDING_ORDERS_KEY, &serde_json::to_string(&entries).unwrap()).unwrap();
        settle_pending(&mut storage, &report).unwrap();

        let retries: Vec<u32> = load_pending(&storage).iter().map(|p| p.retries).collect();
        assert_eq!(retries, vec![1, 0]);
        assert_eq!(raw_entries(&storage, DEAD_ORDERS_KEY), vec![serde_json::json!({"reference": "not-a-uuid"})]);
    }
}
