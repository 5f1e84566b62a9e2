// shop/src/services/orders.rs

use crate::errors::{AppError, Result};
use crate::models::order::generate_order_number;
use crate::models::{IntentPayload, NewOrder, NewOrderItem, OrderAmounts};
use crate::services::clock::Clock;
use crate::store::{OrderOutcome, OrderStore, Settlement};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Rebuilds the order input from a stored intent payload.
///
/// Totals are recomputed from the item snapshots rather than trusted from
/// `payload.amounts`.
pub fn build_new_order(
  buyer_id: Uuid,
  payload: &IntentPayload,
  payment_intent_id: Option<i64>,
  now: DateTime<Utc>,
) -> Result<NewOrder> {
  if payload.items.is_empty() {
    return Err(AppError::Validation("Payment payload carries no items".to_string()));
  }
  if let Some(item) = payload.items.iter().find(|i| i.quantity <= 0) {
    return Err(AppError::Validation(format!("Payload item {} has quantity {}", item.sku, item.quantity)));
  }

  let amounts = OrderAmounts::from_items(&payload.items, payload.amounts.shipping_fee);
  if amounts.total != payload.amounts.total {
    warn!(
      stored_total = %payload.amounts.total,
      computed_total = %amounts.total,
      order_reference = %payload.order_reference,
      "Stored payload total differs from recomputed total; using recomputed value."
    );
  }

  let items = payload
    .items
    .iter()
    .map(|item| NewOrderItem {
      product_id: item.product_id,
      variant_id: item.variant_id,
      product_name: item.product_name.clone(),
      variant_name: item.variant_name.clone(),
      sku: item.sku.clone(),
      quantity: item.quantity,
      unit_price: item.unit_price,
      discount: item.line_discount(),
    })
    .collect();

  Ok(NewOrder {
    id: Uuid::new_v4(),
    order_number: generate_order_number(now),
    buyer_id,
    payment_intent_id,
    customer_name: payload.customer.name.clone(),
    customer_email: payload.customer.email.clone(),
    customer_phone: payload.customer.phone.clone(),
    shipping: payload.shipping.clone(),
    amounts,
    items,
  })
}

/// Creates the order, decrements stock and, with a settlement, flips the intent to SUCCESS.
///
/// `StockConflict` propagates; an intent that is no longer PENDING yields
/// `AlreadySettled` without side effects.
#[instrument(
  name = "orders::materialize_order",
  skip(orders, clock, payload, settlement),
  fields(order_reference = %payload.order_reference, payment_intent_id = ?settlement.as_ref().map(|s| s.intent_id))
)]
pub async fn materialize_order(
  orders: &dyn OrderStore,
  clock: &dyn Clock,
  buyer_id: Uuid,
  payload: &IntentPayload,
  settlement: Option<Settlement>,
) -> Result<OrderOutcome> {
  let new_order = build_new_order(buyer_id, payload, settlement.as_ref().map(|s| s.intent_id), clock.now())?;
  let outcome = orders.create_order(new_order, settlement).await?;
  if let OrderOutcome::Created(order) = &outcome {
    info!(order_id = %order.id, order_number = %order.order_number, total = %order.total_amount, "Order materialized.");
  }
  Ok(outcome)
}
