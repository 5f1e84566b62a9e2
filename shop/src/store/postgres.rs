// shop/src/store/postgres.rs

use super::{CatalogStore, OrderOutcome, OrderStore, PaymentIntentStore, Settlement};
use crate::errors::{AppError, Result};
use crate::models::{
  CatalogProduct, FailureInfo, NewOrder, NewPaymentIntent, Order, OrderItem, PayloadPatch, PaymentIntent,
  PaymentStatus, Product, ProductVariant, TransactionMetadata, TransitionOutcome,
};
use crate::services::stock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const INTENT_COLUMNS: &str = "id, buyer_id, checkout_request_id, merchant_request_id, phone, amount, method, \
                              status, payload, order_id, created_at, updated_at";

const ORDER_COLUMNS: &str = "id, order_number, buyer_id, payment_intent_id, status, customer_name, customer_email, \
                             customer_phone, shipping, subtotal, shipping_fee, discount, total_amount, created_at, \
                             updated_at";

const ORDER_ITEM_COLUMNS: &str =
  "id, order_id, product_id, variant_id, product_name, variant_name, sku, quantity, unit_price, discount, line_total";

#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }

  pub async fn run_migrations(&self) -> Result<()> {
    sqlx::migrate!("./migrations")
      .run(&self.pool)
      .await
      .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;
    info!("Database migrations applied.");
    Ok(())
  }

  /// Inserts the catalog, leaving rows that already exist untouched.
  pub async fn seed_catalog(&self, catalog: Vec<CatalogProduct>) -> Result<()> {
    let mut tx = self.pool.begin().await?;
    for entry in catalog {
      sqlx::query(
        "INSERT INTO products (id, name, published, created_at, updated_at) VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (id) DO NOTHING",
      )
      .bind(entry.product.id)
      .bind(&entry.product.name)
      .bind(entry.product.published)
      .bind(entry.product.created_at)
      .bind(entry.product.updated_at)
      .execute(&mut *tx)
      .await?;

      for variant in entry.variants {
        sqlx::query(
          "INSERT INTO product_variants (id, product_id, sku, name, price, sale_price, stock) \
           VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
        )
        .bind(variant.id)
        .bind(variant.product_id)
        .bind(&variant.sku)
        .bind(&variant.name)
        .bind(variant.price)
        .bind(variant.sale_price)
        .bind(variant.stock)
        .execute(&mut *tx)
        .await?;
      }
    }
    tx.commit().await?;
    info!("Demo catalog seeded.");
    Ok(())
  }
}

/// Row-locks the intent and returns its status.
async fn lock_intent_status(conn: &mut PgConnection, intent_id: i64) -> Result<PaymentStatus> {
  sqlx::query_scalar::<_, PaymentStatus>("SELECT status FROM payment_intents WHERE id = $1 FOR UPDATE")
    .bind(intent_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Payment intent {} not found", intent_id)))
}

async fn mark_success(
  conn: &mut PgConnection,
  intent_id: i64,
  order_id: Uuid,
  metadata: TransactionMetadata,
) -> Result<TransitionOutcome> {
  let patch = PayloadPatch::transaction(metadata).to_value()?;
  let updated = sqlx::query(
    "UPDATE payment_intents SET status = 'SUCCESS', order_id = $2, payload = payload || $3, updated_at = NOW() \
     WHERE id = $1 AND status = 'PENDING'",
  )
  .bind(intent_id)
  .bind(order_id)
  .bind(Json(patch))
  .execute(&mut *conn)
  .await?
  .rows_affected();

  if updated == 1 {
    Ok(TransitionOutcome::Applied)
  } else {
    let current = lock_intent_status(conn, intent_id).await?;
    Err(AppError::InvalidTransition(format!(
      "Payment intent {} is {} and cannot become SUCCESS",
      intent_id, current
    )))
  }
}

async fn insert_order(conn: &mut PgConnection, order: &NewOrder) -> Result<Order> {
  let sql = format!(
    "INSERT INTO orders (id, order_number, buyer_id, payment_intent_id, status, customer_name, customer_email, \
     customer_phone, shipping, subtotal, shipping_fee, discount, total_amount) \
     VALUES ($1, $2, $3, $4, 'paid', $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {}",
    ORDER_COLUMNS
  );
  let mut created = sqlx::query_as::<_, Order>(&sql)
    .bind(order.id)
    .bind(&order.order_number)
    .bind(order.buyer_id)
    .bind(order.payment_intent_id)
    .bind(&order.customer_name)
    .bind(&order.customer_email)
    .bind(&order.customer_phone)
    .bind(Json(&order.shipping))
    .bind(order.amounts.subtotal)
    .bind(order.amounts.shipping_fee)
    .bind(order.amounts.discount)
    .bind(order.amounts.total)
    .fetch_one(&mut *conn)
    .await?;

  let item_sql = format!(
    "INSERT INTO order_items (id, order_id, product_id, variant_id, product_name, variant_name, sku, quantity, \
     unit_price, discount, line_total) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {}",
    ORDER_ITEM_COLUMNS
  );
  for item in &order.items {
    let row = sqlx::query_as::<_, OrderItem>(&item_sql)
      .bind(Uuid::new_v4())
      .bind(order.id)
      .bind(item.product_id)
      .bind(item.variant_id)
      .bind(&item.product_name)
      .bind(&item.variant_name)
      .bind(&item.sku)
      .bind(item.quantity)
      .bind(item.unit_price)
      .bind(item.discount)
      .bind(item.line_total())
      .fetch_one(&mut *conn)
      .await?;
    created.items.push(row);
  }
  Ok(created)
}

#[async_trait]
impl CatalogStore for PgStore {
  async fn find_published_products(&self, product_ids: &[Uuid]) -> Result<Vec<CatalogProduct>> {
    let products = sqlx::query_as::<_, Product>(
      "SELECT id, name, published, created_at, updated_at FROM products WHERE id = ANY($1) AND published = TRUE",
    )
    .bind(product_ids)
    .fetch_all(&self.pool)
    .await?;
    if products.is_empty() {
      return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();
    let variants = sqlx::query_as::<_, ProductVariant>(
      "SELECT id, product_id, sku, name, price, sale_price, stock FROM product_variants \
       WHERE product_id = ANY($1) ORDER BY created_at, id",
    )
    .bind(&ids)
    .fetch_all(&self.pool)
    .await?;

    Ok(
      products
        .into_iter()
        .map(|product| CatalogProduct {
          variants: variants.iter().filter(|v| v.product_id == product.id).cloned().collect(),
          product,
        })
        .collect(),
    )
  }
}

#[async_trait]
impl PaymentIntentStore for PgStore {
  #[instrument(skip(self, new_intent), fields(checkout_request_id = %new_intent.checkout_request_id))]
  async fn create_intent(&self, new_intent: NewPaymentIntent) -> Result<PaymentIntent> {
    let sql = format!(
      "INSERT INTO payment_intents (buyer_id, checkout_request_id, merchant_request_id, phone, amount, method, \
       status, payload) VALUES ($1, $2, $3, $4, $5, 'mpesa', 'PENDING', $6) RETURNING {}",
      INTENT_COLUMNS
    );
    let intent = sqlx::query_as::<_, PaymentIntent>(&sql)
      .bind(new_intent.buyer_id)
      .bind(&new_intent.checkout_request_id)
      .bind(&new_intent.merchant_request_id)
      .bind(&new_intent.phone)
      .bind(new_intent.amount)
      .bind(Json(&new_intent.payload))
      .fetch_one(&self.pool)
      .await?;
    Ok(intent)
  }

  async fn find_by_id(&self, intent_id: i64) -> Result<Option<PaymentIntent>> {
    let sql = format!("SELECT {} FROM payment_intents WHERE id = $1", INTENT_COLUMNS);
    Ok(
      sqlx::query_as::<_, PaymentIntent>(&sql)
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  async fn find_by_checkout_id(&self, checkout_request_id: &str) -> Result<Option<PaymentIntent>> {
    let sql = format!("SELECT {} FROM payment_intents WHERE checkout_request_id = $1", INTENT_COLUMNS);
    Ok(
      sqlx::query_as::<_, PaymentIntent>(&sql)
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  async fn transition_to_success(
    &self,
    intent_id: i64,
    order_id: Uuid,
    metadata: TransactionMetadata,
  ) -> Result<TransitionOutcome> {
    let mut tx = self.pool.begin().await?;
    let outcome = match lock_intent_status(&mut tx, intent_id).await? {
      PaymentStatus::Success => TransitionOutcome::Unchanged(PaymentStatus::Success),
      PaymentStatus::Failed => {
        return Err(AppError::InvalidTransition(format!(
          "Payment intent {} is FAILED and cannot become SUCCESS",
          intent_id
        )))
      }
      PaymentStatus::Pending => mark_success(&mut tx, intent_id, order_id, metadata).await?,
    };
    tx.commit().await?;
    Ok(outcome)
  }

  async fn transition_to_failed(
    &self,
    intent_id: i64,
    failure: FailureInfo,
    metadata: Option<TransactionMetadata>,
  ) -> Result<TransitionOutcome> {
    let mut tx = self.pool.begin().await?;
    let outcome = match lock_intent_status(&mut tx, intent_id).await? {
      PaymentStatus::Failed => TransitionOutcome::Unchanged(PaymentStatus::Failed),
      PaymentStatus::Success => {
        return Err(AppError::InvalidTransition(format!(
          "Payment intent {} is SUCCESS and cannot become FAILED",
          intent_id
        )))
      }
      PaymentStatus::Pending => {
        let patch = PayloadPatch::failure(failure, metadata).to_value()?;
        sqlx::query(
          "UPDATE payment_intents SET status = 'FAILED', payload = payload || $2, updated_at = NOW() \
           WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(intent_id)
        .bind(Json(patch))
        .execute(&mut *tx)
        .await?;
        TransitionOutcome::Applied
      }
    };
    tx.commit().await?;
    Ok(outcome)
  }

  async fn annotate(&self, intent_id: i64, patch: PayloadPatch) -> Result<()> {
    let updated = sqlx::query("UPDATE payment_intents SET payload = payload || $2, updated_at = NOW() WHERE id = $1")
      .bind(intent_id)
      .bind(Json(patch.to_value()?))
      .execute(&self.pool)
      .await?
      .rows_affected();
    if updated == 0 {
      return Err(AppError::NotFound(format!("Payment intent {} not found", intent_id)));
    }
    Ok(())
  }

  async fn link_retry(&self, original_id: i64, retry_id: i64) -> Result<bool> {
    let linked = sqlx::query(
      "UPDATE payment_intents SET payload = payload || $2, updated_at = NOW() \
       WHERE id = $1 AND COALESCE(payload -> 'retriedTo', 'null'::jsonb) = 'null'::jsonb",
    )
    .bind(original_id)
    .bind(Json(PayloadPatch::retried_to(retry_id).to_value()?))
    .execute(&self.pool)
    .await?
    .rows_affected();
    if linked == 1 {
      return Ok(true);
    }
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM payment_intents WHERE id = $1)")
      .bind(original_id)
      .fetch_one(&self.pool)
      .await?;
    if !exists {
      return Err(AppError::NotFound(format!("Payment intent {} not found", original_id)));
    }
    Ok(false)
  }

  async fn list_stale_pending(&self, created_before: DateTime<Utc>, limit: i64) -> Result<Vec<PaymentIntent>> {
    let sql = format!(
      "SELECT {} FROM payment_intents WHERE status = 'PENDING' AND created_at < $1 ORDER BY created_at LIMIT $2",
      INTENT_COLUMNS
    );
    Ok(
      sqlx::query_as::<_, PaymentIntent>(&sql)
        .bind(created_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?,
    )
  }
}

#[async_trait]
impl OrderStore for PgStore {
  #[instrument(skip(self, order, settlement), fields(order_number = %order.order_number))]
  async fn create_order(&self, order: NewOrder, settlement: Option<Settlement>) -> Result<OrderOutcome> {
    let mut tx = self.pool.begin().await?;

    if let Some(settlement) = &settlement {
      let status = lock_intent_status(&mut tx, settlement.intent_id).await?;
      if status != PaymentStatus::Pending {
        info!(intent_id = settlement.intent_id, %status, "Intent already settled; no order written.");
        return Ok(OrderOutcome::AlreadySettled(status));
      }
    }

    // Variant order is fixed so concurrent orders lock rows in the same sequence.
    let mut required: BTreeMap<Uuid, (i32, &str)> = BTreeMap::new();
    for item in &order.items {
      let entry = required.entry(item.variant_id).or_insert((0, item.sku.as_str()));
      entry.0 = stock::add_quantity(entry.0, item.quantity)?;
    }
    for (variant_id, (quantity, sku)) in &required {
      let decremented = sqlx::query(
        "UPDATE product_variants SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND stock >= $2",
      )
      .bind(variant_id)
      .bind(quantity)
      .execute(&mut *tx)
      .await?
      .rows_affected();
      if decremented == 0 {
        warn!(%variant_id, sku, quantity, "Stock ran out before the order could be written.");
        return Err(AppError::StockConflict(format!("{} no longer has {} in stock", sku, quantity)));
      }
    }

    let created = insert_order(&mut tx, &order).await?;
    if let Some(settlement) = settlement {
      mark_success(&mut tx, settlement.intent_id, created.id, settlement.metadata).await?;
    }
    tx.commit().await?;
    Ok(OrderOutcome::Created(created))
  }

  async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>> {
    let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
    let order = sqlx::query_as::<_, Order>(&sql)
      .bind(order_id)
      .fetch_optional(&self.pool)
      .await?;
    let Some(mut order) = order else {
      return Ok(None);
    };
    let item_sql = format!("SELECT {} FROM order_items WHERE order_id = $1 ORDER BY sku", ORDER_ITEM_COLUMNS);
    order.items = sqlx::query_as::<_, OrderItem>(&item_sql)
      .bind(order_id)
      .fetch_all(&self.pool)
      .await?;
    Ok(Some(order))
  }
}
