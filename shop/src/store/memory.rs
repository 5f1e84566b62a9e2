// shop/src/store/memory.rs

use super::{CatalogStore, OrderOutcome, OrderStore, PaymentIntentStore, Settlement};
use crate::errors::{AppError, Result};
use crate::models::{
  CatalogProduct, FailureInfo, NewOrder, NewPaymentIntent, Order, OrderItem, OrderStatus, PayloadPatch,
  PaymentIntent, PaymentMethod, PaymentStatus, Product, ProductVariant, TransactionMetadata, TransitionOutcome,
};
use crate::services::clock::Clock;
use crate::services::stock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
  products: HashMap<Uuid, Product>,
  /// Kept in insertion order so the first variant stays the default.
  variants: Vec<ProductVariant>,
  intents: BTreeMap<i64, PaymentIntent>,
  next_intent_id: i64,
  orders: HashMap<Uuid, Order>,
}

impl MemoryState {
  fn intent_mut(&mut self, intent_id: i64) -> Result<&mut PaymentIntent> {
    self
      .intents
      .get_mut(&intent_id)
      .ok_or_else(|| AppError::NotFound(format!("Payment intent {} not found", intent_id)))
  }

  fn mark_success(
    &mut self,
    intent_id: i64,
    order_id: Uuid,
    metadata: TransactionMetadata,
    now: DateTime<Utc>,
  ) -> Result<TransitionOutcome> {
    let intent = self.intent_mut(intent_id)?;
    match intent.status {
      PaymentStatus::Success => Ok(TransitionOutcome::Unchanged(PaymentStatus::Success)),
      PaymentStatus::Failed => Err(AppError::InvalidTransition(format!(
        "Payment intent {} is FAILED and cannot become SUCCESS",
        intent_id
      ))),
      PaymentStatus::Pending => {
        let payload = PayloadPatch::transaction(metadata).apply_to(&intent.payload)?;
        intent.payload = Json(payload);
        intent.status = PaymentStatus::Success;
        intent.order_id = Some(order_id);
        intent.updated_at = now;
        Ok(TransitionOutcome::Applied)
      }
    }
  }

  /// Every line must fit before any stock moves.
  fn reserve_stock(&mut self, order: &NewOrder) -> Result<()> {
    let mut required: HashMap<Uuid, i32> = HashMap::new();
    for item in &order.items {
      let total = required.entry(item.variant_id).or_default();
      *total = stock::add_quantity(*total, item.quantity)?;
    }
    for (variant_id, quantity) in &required {
      let variant = self
        .variants
        .iter()
        .find(|v| v.id == *variant_id)
        .ok_or_else(|| AppError::VariantNotFound(variant_id.to_string()))?;
      if variant.stock < *quantity {
        return Err(AppError::StockConflict(format!(
          "{} has {} left, {} needed",
          variant.sku, variant.stock, quantity
        )));
      }
    }
    for variant in self.variants.iter_mut() {
      if let Some(quantity) = required.get(&variant.id) {
        variant.stock -= quantity;
      }
    }
    Ok(())
  }
}

/// Process-local store behind a single lock. Used with `STORAGE_BACKEND=memory` and in tests.
pub struct MemoryStore {
  state: Mutex<MemoryState>,
  clock: Arc<dyn Clock>,
}

impl MemoryStore {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      state: Mutex::new(MemoryState {
        next_intent_id: 1,
        ..MemoryState::default()
      }),
      clock,
    }
  }

  pub fn insert_product(&self, product: Product, variants: Vec<ProductVariant>) {
    let mut state = self.state.lock();
    state.products.insert(product.id, product);
    state.variants.extend(variants);
  }

  pub fn seed(&self, catalog: Vec<CatalogProduct>) {
    for entry in catalog {
      self.insert_product(entry.product, entry.variants);
    }
  }

  pub fn variant_stock(&self, variant_id: Uuid) -> Option<i32> {
    self.state.lock().variants.iter().find(|v| v.id == variant_id).map(|v| v.stock)
  }

  pub fn set_variant_stock(&self, variant_id: Uuid, stock: i32) {
    if let Some(variant) = self.state.lock().variants.iter_mut().find(|v| v.id == variant_id) {
      variant.stock = stock;
    }
  }

  pub fn set_published(&self, product_id: Uuid, published: bool) {
    if let Some(product) = self.state.lock().products.get_mut(&product_id) {
      product.published = published;
    }
  }

  pub fn orders_for_intent(&self, intent_id: i64) -> Vec<Order> {
    self
      .state
      .lock()
      .orders
      .values()
      .filter(|o| o.payment_intent_id == Some(intent_id))
      .cloned()
      .collect()
  }

  pub fn order_count(&self) -> usize {
    self.state.lock().orders.len()
  }
}

#[async_trait]
impl CatalogStore for MemoryStore {
  async fn find_published_products(&self, product_ids: &[Uuid]) -> Result<Vec<CatalogProduct>> {
    let state = self.state.lock();
    let found = product_ids
      .iter()
      .filter_map(|id| state.products.get(id))
      .filter(|p| p.published)
      .map(|product| CatalogProduct {
        product: product.clone(),
        variants: state.variants.iter().filter(|v| v.product_id == product.id).cloned().collect(),
      })
      .collect();
    Ok(found)
  }
}

#[async_trait]
impl PaymentIntentStore for MemoryStore {
  async fn create_intent(&self, new_intent: NewPaymentIntent) -> Result<PaymentIntent> {
    let now = self.clock.now();
    let mut state = self.state.lock();
    if state
      .intents
      .values()
      .any(|i| i.checkout_request_id == new_intent.checkout_request_id)
    {
      return Err(AppError::Internal(format!(
        "Duplicate checkout request id {}",
        new_intent.checkout_request_id
      )));
    }
    let id = state.next_intent_id;
    state.next_intent_id += 1;
    let intent = PaymentIntent {
      id,
      buyer_id: new_intent.buyer_id,
      checkout_request_id: new_intent.checkout_request_id,
      merchant_request_id: new_intent.merchant_request_id,
      phone: new_intent.phone,
      amount: new_intent.amount,
      method: PaymentMethod::Mpesa,
      status: PaymentStatus::Pending,
      payload: Json(new_intent.payload),
      order_id: None,
      created_at: now,
      updated_at: now,
    };
    state.intents.insert(id, intent.clone());
    Ok(intent)
  }

  async fn find_by_id(&self, intent_id: i64) -> Result<Option<PaymentIntent>> {
    Ok(self.state.lock().intents.get(&intent_id).cloned())
  }

  async fn find_by_checkout_id(&self, checkout_request_id: &str) -> Result<Option<PaymentIntent>> {
    let state = self.state.lock();
    Ok(
      state
        .intents
        .values()
        .find(|i| i.checkout_request_id == checkout_request_id)
        .cloned(),
    )
  }

  async fn transition_to_success(
    &self,
    intent_id: i64,
    order_id: Uuid,
    metadata: TransactionMetadata,
  ) -> Result<TransitionOutcome> {
    let now = self.clock.now();
    self.state.lock().mark_success(intent_id, order_id, metadata, now)
  }

  async fn transition_to_failed(
    &self,
    intent_id: i64,
    failure: FailureInfo,
    metadata: Option<TransactionMetadata>,
  ) -> Result<TransitionOutcome> {
    let now = self.clock.now();
    let mut state = self.state.lock();
    let intent = state.intent_mut(intent_id)?;
    match intent.status {
      PaymentStatus::Failed => Ok(TransitionOutcome::Unchanged(PaymentStatus::Failed)),
      PaymentStatus::Success => Err(AppError::InvalidTransition(format!(
        "Payment intent {} is SUCCESS and cannot become FAILED",
        intent_id
      ))),
      PaymentStatus::Pending => {
        let payload = PayloadPatch::failure(failure, metadata).apply_to(&intent.payload)?;
        intent.payload = Json(payload);
        intent.status = PaymentStatus::Failed;
        intent.updated_at = now;
        Ok(TransitionOutcome::Applied)
      }
    }
  }

  async fn annotate(&self, intent_id: i64, patch: PayloadPatch) -> Result<()> {
    let now = self.clock.now();
    let mut state = self.state.lock();
    let intent = state.intent_mut(intent_id)?;
    intent.payload = Json(patch.apply_to(&intent.payload)?);
    intent.updated_at = now;
    Ok(())
  }

  async fn link_retry(&self, original_id: i64, retry_id: i64) -> Result<bool> {
    let now = self.clock.now();
    let mut state = self.state.lock();
    let intent = state.intent_mut(original_id)?;
    if intent.payload.retried_to.is_some() {
      return Ok(false);
    }
    intent.payload = Json(PayloadPatch::retried_to(retry_id).apply_to(&intent.payload)?);
    intent.updated_at = now;
    Ok(true)
  }

  async fn list_stale_pending(&self, created_before: DateTime<Utc>, limit: i64) -> Result<Vec<PaymentIntent>> {
    let state = self.state.lock();
    let mut stale: Vec<PaymentIntent> = state
      .intents
      .values()
      .filter(|i| i.status == PaymentStatus::Pending && i.created_at < created_before)
      .cloned()
      .collect();
    stale.sort_by_key(|i| i.created_at);
    stale.truncate(usize::try_from(limit).unwrap_or(0));
    Ok(stale)
  }
}

#[async_trait]
impl OrderStore for MemoryStore {
  async fn create_order(&self, order: NewOrder, settlement: Option<Settlement>) -> Result<OrderOutcome> {
    let now = self.clock.now();
    let mut state = self.state.lock();

    if let Some(settlement) = &settlement {
      let status = state.intent_mut(settlement.intent_id)?.status;
      if status != PaymentStatus::Pending {
        return Ok(OrderOutcome::AlreadySettled(status));
      }
    }

    state.reserve_stock(&order)?;

    let items = order
      .items
      .iter()
      .map(|item| OrderItem {
        id: Uuid::new_v4(),
        order_id: order.id,
        product_id: item.product_id,
        variant_id: item.variant_id,
        product_name: item.product_name.clone(),
        variant_name: item.variant_name.clone(),
        sku: item.sku.clone(),
        quantity: item.quantity,
        unit_price: item.unit_price,
        discount: item.discount,
        line_total: item.line_total(),
      })
      .collect();
    let created = Order {
      id: order.id,
      order_number: order.order_number,
      buyer_id: order.buyer_id,
      payment_intent_id: order.payment_intent_id,
      status: OrderStatus::Paid,
      customer_name: order.customer_name,
      customer_email: order.customer_email,
      customer_phone: order.customer_phone,
      shipping: Json(order.shipping),
      subtotal: order.amounts.subtotal,
      shipping_fee: order.amounts.shipping_fee,
      discount: order.amounts.discount,
      total_amount: order.amounts.total,
      created_at: now,
      updated_at: now,
      items,
    };

    if let Some(settlement) = settlement {
      state.mark_success(settlement.intent_id, created.id, settlement.metadata, now)?;
    }
    state.orders.insert(created.id, created.clone());
    Ok(OrderOutcome::Created(created))
  }

  async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>> {
    Ok(self.state.lock().orders.get(&order_id).cloned())
  }
}
