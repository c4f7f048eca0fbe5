//! Cashew Shop - storefront API

use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::StatusCode, routing::{get, post}, Json, Router};
use cashew_shop::checkout::{self, load_pending, retry_pending, settle_pending, OrderSubmitter, SubmissionOutcome};
use cashew_shop::config::AppConfig;
use cashew_shop::domain::aggregates::{CartItem, CartSummary, LineSelection, OrderDraft, OrderError, Product, ShippingForm};
use cashew_shop::domain::value_objects::Locale;
use cashew_shop::infra::notify::{LogNotifier, NatsNotifier, Notifier};
use cashew_shop::infra::postgres::{OrderTracking, PgCatalog, PgOrderStore};
use cashew_shop::storage::{CartSession, FileStorage};
use cashew_shop::{ShippingPolicy, ShopError};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState { pub catalog: PgCatalog, pub orders: PgOrderStore, pub submitter: OrderSubmitter, pub carts: Arc<Mutex<FileStorage>>, pub shipping: ShippingPolicy }

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let cfg = AppConfig::from_env()?;
    let db = PgPoolOptions::new().max_connections(10).connect(&cfg.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let notifier: Arc<dyn Notifier> = match &cfg.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsNotifier::new(client, cfg.notify_subject_prefix.clone())),
            Err(e) => { tracing::warn!(error = %e, "NATS unreachable, notifications go to the log"); Arc::new(LogNotifier) }
        },
        None => Arc::new(LogNotifier),
    };
    let orders = PgOrderStore::new(db.clone());
    let state = AppState {
        catalog: PgCatalog::new(db.clone()),
        orders: orders.clone(),
        submitter: OrderSubmitter::new(Arc::new(orders), notifier),
        carts: Arc::new(Mutex::new(FileStorage::open(&cfg.cart_storage_dir, Some(cfg.cart_storage_capacity))?)),
        shipping: cfg.shipping,
    };
    tokio::spawn(retry_parked_orders(state.clone(), Duration::from_secs(cfg.pending_retry_secs.max(1)), cfg.pending_max_retries));

    let app = router(state);
    tracing::info!("🥜 Cashew Shop listening on 0.0.0.0:{}", cfg.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", cfg.port)).await?, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "cashew-shop"})) }))
        .route("/api/v1/products", get(list_products))
        .route("/api/v1/products/:id", get(get_product))
        .route("/api/v1/cart/:session", get(get_cart).post(add_to_cart).put(update_quantity).delete(clear_cart))
        .route("/api/v1/cart/:session/remove", post(remove_from_cart))
        .route("/api/v1/checkout/:session", post(place_order))
        .route("/api/v1/orders/:id", get(get_order))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}

/// Parked orders are read and settled under the cart lock, but offered to the store without it.
async fn retry_parked_orders(state: AppState, every: Duration, max_retries: u32) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let parked = load_pending(&*state.carts.lock().await);
        if parked.is_empty() { continue; }
        let report = retry_pending(&parked, &state.submitter, max_retries).await;
        if let Err(e) = settle_pending(&mut *state.carts.lock().await, &report) {
            tracing::error!(error = %e, "failed to settle the pending order outbox");
        }
    }
}

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError { (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()) }

fn cart_key(session: &str) -> Result<String, ApiError> {
    if session.is_empty() || session.len() > 128 { return Err((StatusCode::BAD_REQUEST, "Invalid session".to_string())); }
    Ok(format!("cart:{session}"))
}

#[derive(Debug, Deserialize)] pub struct LocaleParams { pub locale: Option<Locale> }

#[derive(Debug, Serialize)]
pub struct ProductView { #[serde(flatten)] pub product: Product, pub display_name: String, pub min_price: i64, pub max_price: i64, pub purchasable: bool, pub badge_color: Option<&'static str>, pub flavor_label: Option<&'static str> }

impl ProductView {
    fn new(product: Product, locale: Locale) -> Self {
        let (min_price, max_price) = product.display_price_range();
        Self {
            display_name: product.display_name(locale).to_string(), min_price, max_price,
            purchasable: product.is_purchasable(), badge_color: product.flavor_color.map(|t| t.badge_color()),
            flavor_label: product.flavor_color.map(|t| t.label(locale)), product,
        }
    }
}

async fn list_products(State(s): State<AppState>, Query(p): Query<LocaleParams>) -> Result<Json<Vec<ProductView>>, ApiError> {
    let locale = p.locale.unwrap_or_default();
    let products = s.catalog.list_active().await.map_err(internal)?;
    Ok(Json(products.into_iter().map(|p| ProductView::new(p, locale)).collect()))
}

async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>, Query(p): Query<LocaleParams>) -> Result<Json<ProductView>, ApiError> {
    s.catalog.find(id).await.map_err(internal)?.map(|prod| Json(ProductView::new(prod, p.locale.unwrap_or_default()))).ok_or((StatusCode::NOT_FOUND, "Not found".to_string()))
}

#[derive(Debug, Serialize)] pub struct CartLineView { pub key: String, #[serde(flatten)] pub item: CartItem, pub unit_price: i64, pub original_price: i64, pub discount_percent: u32, pub line_total: i64 }
#[derive(Debug, Serialize)] pub struct CartView { pub items: Vec<CartLineView>, pub summary: CartSummary }

fn cart_view<S: cashew_shop::storage::DurableStorage>(session: &CartSession<S>, shipping: &ShippingPolicy) -> CartView {
    let cart = session.cart();
    let items = cart.items().iter().map(|i| CartLineView {
        key: i.key().to_string(), unit_price: i.unit_price(), original_price: i.original_price(),
        discount_percent: i.discount_percent(), line_total: i.line_total(), item: i.clone(),
    }).collect();
    CartView { items, summary: cart.summary(shipping) }
}

async fn get_cart(State(s): State<AppState>, Path(session): Path<String>) -> Result<Json<CartView>, ApiError> {
    let key = cart_key(&session)?;
    let mut storage = s.carts.lock().await;
    let session = CartSession::hydrate(&mut *storage, key);
    Ok(Json(cart_view(&session, &s.shipping)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest { pub product_id: Uuid, pub quantity: Option<u32>, #[serde(flatten)] pub selection: LineSelection }

async fn add_to_cart(State(s): State<AppState>, Path(session): Path<String>, Json(r): Json<AddToCartRequest>) -> Result<(StatusCode, Json<CartView>), ApiError> {
    let key = cart_key(&session)?;
    let product = s.catalog.find(r.product_id).await.map_err(internal)?.ok_or((StatusCode::NOT_FOUND, ShopError::ProductNotFound.to_string()))?;
    if !product.is_purchasable() { return Err((StatusCode::CONFLICT, "Out of stock".to_string())); }
    let selection = r.selection.applicable_to(&product);
    let mut storage = s.carts.lock().await;
    let mut session = CartSession::hydrate(&mut *storage, key);
    session.add(product, r.quantity.unwrap_or(1), selection);
    Ok((StatusCode::CREATED, Json(cart_view(&session, &s.shipping))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuantityRequest { pub product_id: String, pub quantity: i64, #[serde(flatten)] pub selection: LineSelection }

async fn update_quantity(State(s): State<AppState>, Path(session): Path<String>, Json(r): Json<UpdateQuantityRequest>) -> Result<Json<CartView>, ApiError> {
    let key = cart_key(&session)?;
    let mut storage = s.carts.lock().await;
    let mut session = CartSession::hydrate(&mut *storage, key);
    session.update_quantity(&r.product_id, &r.selection, r.quantity);
    Ok(Json(cart_view(&session, &s.shipping)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveRequest { pub product_id: String, #[serde(flatten)] pub selection: LineSelection }

async fn remove_from_cart(State(s): State<AppState>, Path(session): Path<String>, Json(r): Json<RemoveRequest>) -> Result<Json<CartView>, ApiError> {
    let key = cart_key(&session)?;
    let mut storage = s.carts.lock().await;
    let mut session = CartSession::hydrate(&mut *storage, key);
    session.remove(&r.product_id, &r.selection);
    Ok(Json(cart_view(&session, &s.shipping)))
}

async fn clear_cart(State(s): State<AppState>, Path(session): Path<String>) -> Result<StatusCode, ApiError> {
    let key = cart_key(&session)?;
    let mut storage = s.carts.lock().await;
    CartSession::hydrate(&mut *storage, key).clear();
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)] pub struct CheckoutResponse { pub order_id: Option<String> }

fn order_rejected(e: OrderError) -> ApiError {
    match e {
        OrderError::NoItems => (StatusCode::BAD_REQUEST, e.to_string()),
        OrderError::InvalidShipping(_) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}

/// The cart lock is held only while the order is taken out of the cart.
async fn place_order(State(s): State<AppState>, Path(session): Path<String>, Json(form): Json<ShippingForm>) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let key = cart_key(&session)?;
    let draft = {
        let mut storage = s.carts.lock().await;
        let mut session = CartSession::hydrate(&mut *storage, key);
        checkout::take_order(&mut session, form, &s.shipping).map_err(order_rejected)?
    };
    // Spawned so a dropped connection cannot strand an order the cart no longer holds.
    let order_id = tokio::spawn(deliver(s, draft)).await.map_err(internal)?;
    Ok((StatusCode::CREATED, Json(CheckoutResponse { order_id })))
}

async fn deliver(s: AppState, draft: OrderDraft) -> Option<String> {
    match s.submitter.deliver(&draft).await {
        SubmissionOutcome::Placed { order_id, .. } => Some(order_id),
        SubmissionOutcome::Rejected { attempts } => {
            let event = checkout::park_rejected(&mut *s.carts.lock().await, draft, attempts);
            s.submitter.notifier().notify(&event).await;
            None
        }
    }
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<OrderTracking>, ApiError> {
    s.orders.tracking(id).await.map_err(internal)?.map(Json).ok_or((StatusCode::NOT_FOUND, ShopError::OrderNotFound.to_string()))
}
