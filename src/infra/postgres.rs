//! Postgres-backed catalog and order store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;
use crate::checkout::{OrderStore, Record, StoreError};
use crate::domain::aggregates::{OrderStatus, PriceVariant, Product};
use crate::Result;

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name_ja: String,
    name_th: String,
    price: i64,
    sale_price: Option<i64>,
    stock: i32,
    is_active: bool,
    is_featured: bool,
    sort_order: i32,
    flavor_color: Option<String>,
    weight_g: Option<i32>,
    is_set: bool,
    price_variants: Json<Vec<PriceVariant>>,
    created_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        let flavor_color = row.flavor_color.as_deref().and_then(|tag| match tag.parse() {
            Ok(tag) => Some(tag),
            Err(e) => {
                warn!(product_id = %row.id, error = %e, "ignoring unknown flavor tag");
                None
            }
        });
        Self {
            id: row.id.to_string(),
            name_ja: row.name_ja,
            name_th: row.name_th,
            price: row.price,
            sale_price: row.sale_price,
            stock: row.stock,
            is_active: row.is_active,
            is_featured: row.is_featured,
            sort_order: row.sort_order,
            flavor_color,
            weight_g: row.weight_g.and_then(|w| u32::try_from(w).ok()),
            is_set: row.is_set,
            price_variants: row.price_variants.0,
            created_at: row.created_at,
        }
    }
}

const PRODUCT_COLUMNS: &str = "id, name_ja, name_th, price, sale_price, stock, is_active, is_featured, sort_order, flavor_color, weight_g, is_set, price_variants, created_at";

/// Rows that break the pricing rules never reach a cart.
fn admit(product: Product) -> Option<Product> {
    match product.validate() {
        Ok(()) => Some(product),
        Err(e) => {
            warn!(product_id = %product.id, error = %e, "skipping product with invalid pricing");
            None
        }
    }
}

/// Read-only view of the active catalog.
#[derive(Clone, Debug)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn list_active(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active ORDER BY sort_order, created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Product::from).filter_map(admit).collect())
    }

    /// Inactive or invalid products are not returned.
    pub async fn find(&self, id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND is_active"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Product::from).and_then(admit))
    }
}

/// What the tracking page shows for an order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderTracking {
    pub order_id: String,
    pub status: OrderStatus,
    pub progress_step: usize,
    pub total_amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn tracking(&self, id: Uuid) -> Result<Option<OrderTracking>> {
        let row: Option<(String, String, i64, DateTime<Utc>)> =
            sqlx::query_as("SELECT id::text, status, total_amount, created_at FROM orders WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(order_id, status, total_amount, created_at)| {
            let status = status.parse().unwrap_or_else(|e| {
                warn!(order_id = %order_id, error = %e, "unknown order status, showing pending");
                OrderStatus::Pending
            });
            OrderTracking { order_id, status, progress_step: status.progress_step(), total_amount, created_at }
        }))
    }
}

/// Quoted column list for a record, refusing anything that is not a plain identifier.
fn column_list<'a>(columns: impl IntoIterator<Item = &'a String>) -> std::result::Result<String, StoreError> {
    let mut quoted = Vec::new();
    for c in columns {
        let plain = !c.is_empty() && c.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
        if !plain {
            return Err(StoreError::InvalidColumn(c.clone()));
        }
        quoted.push(format!("\"{c}\""));
    }
    if quoted.is_empty() {
        return Err(StoreError::InvalidColumn(String::new()));
    }
    Ok(quoted.join(", "))
}

fn classify(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(db) => StoreError::Rejected(db.message().to_string()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_order(&self, record: &Record) -> std::result::Result<String, StoreError> {
        let cols = column_list(record.keys())?;
        let sql = format!("INSERT INTO orders ({cols}) SELECT {cols} FROM jsonb_populate_record(NULL::orders, $1) RETURNING id::text");
        let (id,): (String,) = sqlx::query_as(&sql)
            .bind(Value::Object(record.clone()))
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        Ok(id)
    }

    async fn create_order_items(&self, records: &[Record]) -> std::result::Result<(), StoreError> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let cols = column_list(first.keys())?;
        let sql = format!("INSERT INTO order_items ({cols}) SELECT {cols} FROM jsonb_populate_recordset(NULL::order_items, $1)");
        let rows = Value::Array(records.iter().cloned().map(Value::Object).collect());
        sqlx::query(&sql).bind(rows).execute(&self.pool).await.map_err(classify)?;
        Ok(())
    }
}
