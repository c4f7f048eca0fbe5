//! Checkout: turns a cart and shipping form into an order in the order store.
//!
//! Deployments of the order store have drifted over time, so an order is
//! offered in a fixed sequence of column layouts ([`OrderShape`]), most
//! complete first, until one is accepted. Order lines get the same treatment
//! ([`ItemShape`]). If no layout is accepted the shopper is not blocked: the
//! cart is cleared as on success, the order is parked in a durable outbox and
//! operators are notified.

mod outbox;

pub use outbox::{
    enqueue_pending, load_pending, retry_pending, settle_pending, ParkedOrder, RetryReport, DEAD_ORDERS_KEY,
    PENDING_ORDERS_KEY,
};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use crate::domain::aggregates::{OrderDraft, OrderError, ShippingForm};
use crate::domain::discount::ShippingPolicy;
use crate::domain::events::DomainEvent;
use crate::infra::notify::Notifier;
use crate::storage::{CartSession, DurableStorage};

/// One row offered to the order store, column name to value.
pub type Record = Map<String, Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Payload rejected: {0}")]
    Rejected(String),

    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts one order row and returns its id.
    async fn create_order(&self, record: &Record) -> Result<String, StoreError>;

    async fn create_order_items(&self, records: &[Record]) -> Result<(), StoreError>;
}

/// Column layouts for the order row, in the order they are tried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderShape {
    Full,
    Standard,
    Basic,
    Bare,
}

impl OrderShape {
    pub const ALL: [OrderShape; 4] = [Self::Full, Self::Standard, Self::Basic, Self::Bare];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Standard => "standard",
            Self::Basic => "basic",
            Self::Bare => "bare",
        }
    }

    pub fn record(&self, draft: &OrderDraft, with_client_id: bool) -> Record {
        let form = &draft.shipping;
        let mut r = Record::new();
        if with_client_id {
            r.insert("id".into(), json!(draft.reference.to_string()));
        }
        r.insert("customer_name".into(), json!(form.customer_name));
        r.insert("phone".into(), json!(form.phone));
        match self {
            Self::Full => {
                r.insert("email".into(), json!(form.email));
                r.insert("postal_code".into(), json!(form.postal_code));
                r.insert("address".into(), json!(form.address));
                r.insert("notes".into(), json!(form.notes));
                r.insert("subtotal".into(), json!(draft.subtotal));
                r.insert("discount_amount".into(), json!(draft.discount_amount));
                r.insert("shipping_fee".into(), json!(draft.shipping_fee));
            }
            Self::Standard => {
                r.insert("address".into(), json!(full_address(form)));
                r.insert("notes".into(), json!(form.notes));
                r.insert("discount_amount".into(), json!(draft.discount_amount));
            }
            Self::Basic | Self::Bare => {
                r.insert("address".into(), json!(full_address(form)));
            }
        }
        r.insert("total_amount".into(), json!(draft.total_amount));
        if *self != Self::Bare {
            r.insert("status".into(), json!(draft.status.as_str()));
        }
        r
    }
}

fn full_address(form: &ShippingForm) -> String { format!("〒{} {}", form.postal_code.trim(), form.address.trim()) }

/// Column layouts for order lines, in the order they are tried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemShape {
    Full,
    Core,
    PriceColumn,
}

impl ItemShape {
    pub const ALL: [ItemShape; 3] = [Self::Full, Self::Core, Self::PriceColumn];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Core => "core",
            Self::PriceColumn => "price_column",
        }
    }

    pub fn records(&self, draft: &OrderDraft, order_id: &str) -> Vec<Record> {
        draft
            .lines
            .iter()
            .map(|line| {
                let mut r = Record::new();
                r.insert("order_id".into(), json!(order_id));
                r.insert("product_id".into(), json!(line.product_id));
                r.insert("quantity".into(), json!(line.quantity));
                match self {
                    Self::Full => {
                        r.insert("product_name".into(), json!(line.product_name));
                        r.insert("unit_price".into(), json!(line.unit_price));
                        r.insert("size_g".into(), json!(line.size_g));
                        r.insert("flavors".into(), json!(line.flavors));
                        r.insert("salt_option".into(), json!(line.salt_option));
                    }
                    Self::Core => {
                        r.insert("unit_price".into(), json!(line.unit_price));
                    }
                    Self::PriceColumn => {
                        r.insert("price".into(), json!(line.unit_price));
                    }
                }
                r
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Placed { order_id: String, lines_saved: bool },
    Rejected { attempts: usize },
}

/// Offers drafts to an order store and reports domain events to a notifier.
#[derive(Clone)]
pub struct OrderSubmitter {
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
}

impl OrderSubmitter {
    pub fn new(store: Arc<dyn OrderStore>, notifier: Arc<dyn Notifier>) -> Self { Self { store, notifier } }

    pub fn notifier(&self) -> &dyn Notifier { self.notifier.as_ref() }

    /// Tries every order layout with the client-generated id, then every
    /// layout letting the store assign one. Lines follow once an id is known.
    pub async fn place(&self, draft: &OrderDraft) -> SubmissionOutcome {
        let mut attempts = 0;
        let mut order_id = None;
        'shapes: for with_client_id in [true, false] {
            for shape in OrderShape::ALL {
                attempts += 1;
                match self.store.create_order(&shape.record(draft, with_client_id)).await {
                    Ok(id) => {
                        info!(reference = %draft.reference, order_id = %id, shape = shape.name(), with_client_id, "order accepted");
                        order_id = Some(id);
                        break 'shapes;
                    }
                    Err(e) => warn!(reference = %draft.reference, shape = shape.name(), with_client_id, error = %e, "order shape rejected"),
                }
            }
        }
        let Some(order_id) = order_id else {
            return SubmissionOutcome::Rejected { attempts };
        };

        let mut lines_saved = false;
        for shape in ItemShape::ALL {
            match self.store.create_order_items(&shape.records(draft, &order_id)).await {
                Ok(()) => {
                    lines_saved = true;
                    break;
                }
                Err(e) => warn!(order_id = %order_id, shape = shape.name(), error = %e, "order item shape rejected"),
            }
        }
        if !lines_saved {
            error!(order_id = %order_id, lines = draft.lines.len(), "order saved without its lines");
        }
        SubmissionOutcome::Placed { order_id, lines_saved }
    }

    /// [`place`](Self::place), announcing the order once it is in.
    pub async fn deliver(&self, draft: &OrderDraft) -> SubmissionOutcome {
        let outcome = self.place(draft).await;
        if let SubmissionOutcome::Placed { order_id, .. } = &outcome {
            self.notifier.notify(&draft.placed_event(order_id)).await;
        }
        outcome
    }
}

/// Builds the order from the session's cart and empties the cart. Touches
/// nothing but the session's storage.
pub fn take_order<S: DurableStorage>(session: &mut CartSession<S>, form: ShippingForm, policy: &ShippingPolicy) -> Result<OrderDraft, OrderError> {
    let draft = OrderDraft::build(session.cart(), form, policy)?;
    session.clear();
    Ok(draft)
}

/// Puts a draft every shape rejected into the outbox and returns the event
/// operators should get.
pub fn park_rejected<S: DurableStorage + ?Sized>(storage: &mut S, draft: OrderDraft, attempts: usize) -> DomainEvent {
    error!(reference = %draft.reference, attempts, total_amount = draft.total_amount, "every order shape rejected, parking order");
    let event = draft.failed_event(attempts);
    if let Err(e) = enqueue_pending(storage, draft) {
        error!(error = %e, "failed to park rejected order");
    }
    event
}

/// Submits the session's cart for a caller that owns the session outright.
/// Returns the order id, or `None` when the store accepted nothing; the cart
/// is cleared in both cases. Only an empty cart or an invalid form is an
/// error, and neither touches the cart.
pub async fn submit_order<S: DurableStorage + Send>(
    session: &mut CartSession<S>,
    form: ShippingForm,
    submitter: &OrderSubmitter,
    policy: &ShippingPolicy,
) -> Result<Option<String>, OrderError> {
    let draft = take_order(session, form, policy)?;
    Ok(match submitter.deliver(&draft).await {
        SubmissionOutcome::Placed { order_id, .. } => Some(order_id),
        SubmissionOutcome::Rejected { attempts } => {
            let event = park_rejected(session.storage_mut(), draft, attempts);
            submitter.notifier().notify(&event).await;
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{LineSelection, PriceVariant, Product};
    use crate::domain::events::{DomainEvent, OrderEvent};
    use crate::storage::{load_cart_items, MemoryStorage, CART_STORAGE_KEY};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Accepts rows whose columns all exist and cover the required ones.
    #[derive(Default)]
    pub(super) struct SchemaStore {
        pub order_columns: HashSet<&'static str>,
        pub order_required: HashSet<&'static str>,
        pub item_columns: HashSet<&'static str>,
        pub orders: Mutex<Vec<Record>>,
        pub items: Mutex<Vec<Record>>,
    }

    impl SchemaStore {
        pub fn pinned() -> Self {
            Self {
                order_columns: ["id", "customer_name", "phone", "email", "postal_code", "address", "notes", "subtotal", "discount_amount", "shipping_fee", "total_amount", "status"].into(),
                order_required: ["customer_name", "phone", "address", "total_amount"].into(),
                item_columns: ["order_id", "product_id", "product_name", "quantity", "unit_price", "size_g", "flavors", "salt_option"].into(),
                ..Self::default()
            }
        }

        pub fn rejecting_everything() -> Self { Self::default() }

        fn fits(record: &Record, columns: &HashSet<&'static str>, required: &HashSet<&'static str>) -> Result<(), StoreError> {
            if let Some(unknown) = record.keys().find(|k| !columns.contains(k.as_str())) {
                return Err(StoreError::Rejected(format!("column {unknown} does not exist")));
            }
            if let Some(missing) = required.iter().find(|c| !record.contains_key(**c)) {
                return Err(StoreError::Rejected(format!("null value in column {missing}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl OrderStore for SchemaStore {
        async fn create_order(&self, record: &Record) -> Result<String, StoreError> {
            Self::fits(record, &self.order_columns, &self.order_required)?;
            let id = match record.get("id").and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => format!("store-{}", self.orders.lock().unwrap().len() + 1),
            };
            self.orders.lock().unwrap().push(record.clone());
            Ok(id)
        }

        async fn create_order_items(&self, records: &[Record]) -> Result<(), StoreError> {
            for r in records {
                Self::fits(r, &self.item_columns, &HashSet::new())?;
            }
            self.items.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
    }

    #[derive(Default)]
    pub(super) struct RecordingNotifier {
        pub events: Mutex<Vec<DomainEvent>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: &DomainEvent) { self.events.lock().unwrap().push(event.clone()); }
    }

    fn form() -> ShippingForm {
        ShippingForm {
            customer_name: "Somchai".into(),
            phone: "081-234-5678".into(),
            email: None,
            postal_code: "10110".into(),
            address: "123 Sukhumvit Rd, Bangkok".into(),
            notes: Some("leave at door".into()),
        }
    }

    fn session_with_items() -> CartSession<MemoryStorage> {
        let mut p = Product::new("P1", "カシュー", 100);
        p.stock = 10;
        p.price_variants = vec![PriceVariant { size_g: 200, price: 150, sale_price: Some(120) }];
        let mut session = CartSession::hydrate(MemoryStorage::new(), CART_STORAGE_KEY);
        session.add(p, 3, LineSelection::size(200));
        session
    }

    fn submitter(store: &Arc<SchemaStore>, notifier: &Arc<RecordingNotifier>) -> OrderSubmitter {
        OrderSubmitter::new(store.clone(), notifier.clone())
    }

    #[tokio::test]
    async fn test_full_shape_uses_client_id() {
        let store = Arc::new(SchemaStore::pinned());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut session = session_with_items();
        let id = submit_order(&mut session, form(), &submitter(&store, &notifier), &ShippingPolicy::default()).await.unwrap();

        let id = id.unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        let orders = store.orders.lock().unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0]["total_amount"], json!(342 + 50));
        assert_eq!(orders[0]["discount_amount"], json!(18));
        assert_eq!(store.items.lock().unwrap()[0]["unit_price"], json!(120));
        assert!(session.cart().is_empty());
        assert!(matches!(notifier.events.lock().unwrap()[0], DomainEvent::Order(OrderEvent::Placed { .. })));
    }

    #[tokio::test]
    async fn test_falls_back_to_store_assigned_id() {
        let mut store = SchemaStore::pinned();
        store.order_columns = ["customer_name", "phone", "address", "total_amount"].into();
        store.item_columns = ["order_id", "product_id", "quantity", "price"].into();
        let store = Arc::new(store);
        let notifier = Arc::new(RecordingNotifier::default());
        let s = submitter(&store, &notifier);

        let draft = OrderDraft::build(session_with_items().cart(), form(), &ShippingPolicy::default()).unwrap();
        let outcome = s.place(&draft).await;
        assert_eq!(outcome, SubmissionOutcome::Placed { order_id: "store-1".into(), lines_saved: true });
        assert_eq!(store.items.lock().unwrap()[0]["price"], json!(120));
    }

    #[tokio::test]
    async fn test_lines_rejected_still_placed() {
        let mut store = SchemaStore::pinned();
        store.item_columns = HashSet::new();
        let store = Arc::new(store);
        let notifier = Arc::new(RecordingNotifier::default());
        let draft = OrderDraft::build(session_with_items().cart(), form(), &ShippingPolicy::default()).unwrap();
        let outcome = submitter(&store, &notifier).place(&draft).await;
        assert!(matches!(outcome, SubmissionOutcome::Placed { lines_saved: false, .. }));
    }

    #[tokio::test]
    async fn test_total_rejection_does_not_block() {
        let store = Arc::new(SchemaStore::rejecting_everything());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut session = session_with_items();

        let id = submit_order(&mut session, form(), &submitter(&store, &notifier), &ShippingPolicy::default()).await.unwrap();

        assert_eq!(id, None);
        assert!(session.cart().is_empty());
        assert!(load_cart_items(session.storage(), CART_STORAGE_KEY).is_empty());
        let parked = load_pending(session.storage());
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].draft.lines[0].quantity, 3);
        assert_eq!(parked[0].retries, 0);
        let events = notifier.events.lock().unwrap();
        assert!(matches!(events[0], DomainEvent::Order(OrderEvent::SubmissionFailed { attempts: 8, .. })));
    }

    #[tokio::test]
    async fn test_invalid_form_keeps_cart() {
        let store = Arc::new(SchemaStore::pinned());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut session = session_with_items();
        let mut bad = form();
        bad.phone = "call me".into();
        let err = submit_order(&mut session, bad, &submitter(&store, &notifier), &ShippingPolicy::default()).await;
        assert!(matches!(err, Err(OrderError::InvalidShipping(_))));
        assert_eq!(session.cart().total_quantity(), 3);
        assert!(store.orders.lock().unwrap().is_empty());
    }

    #[test]
    fn test_take_order_empties_cart_before_any_store_call() {
        let mut session = session_with_items();
        let draft = take_order(&mut session, form(), &ShippingPolicy::default()).unwrap();
        assert_eq!(draft.item_count(), 3);
        assert!(session.cart().is_empty());
        assert!(load_cart_items(session.storage(), CART_STORAGE_KEY).is_empty());

        let err = take_order(&mut session, form(), &ShippingPolicy::default()).unwrap_err();
        assert!(matches!(err, OrderError::NoItems));
    }

    #[test]
    fn test_park_rejected_keeps_earlier_orders() {
        let mut storage = MemoryStorage::new();
        let draft = OrderDraft::build(session_with_items().cart(), form(), &ShippingPolicy::default()).unwrap();
        park_rejected(&mut storage, draft.clone(), 8);
        let event = park_rejected(&mut storage, draft, 8);
        assert!(matches!(event, DomainEvent::Order(OrderEvent::SubmissionFailed { attempts: 8, .. })));
        assert_eq!(load_pending(&storage).len(), 2);
    }

    #[test]
    fn test_shapes_shrink() {
        let draft = OrderDraft::build(session_with_items().cart(), form(), &ShippingPolicy::default()).unwrap();
        let sizes: Vec<usize> = OrderShape::ALL.iter().map(|s| s.record(&draft, false).len()).collect();
        assert!(sizes.windows(2).all(|w| w[0] > w[1]), "{sizes:?}");
        assert_eq!(OrderShape::Full.record(&draft, true)["id"], json!(draft.reference.to_string()));
        assert_eq!(OrderShape::Basic.record(&draft, false)["address"], json!("〒10110 123 Sukhumvit Rd, Bangkok"));
    }
}
