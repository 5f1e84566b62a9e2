// shop/src/services/status.rs

use crate::config::PaymentSettings;
use crate::errors::{AppError, Result};
use crate::models::{AuthenticatedUser, Order, PaymentIntent, PaymentStatus};
use crate::state::AppState;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// What the storefront sees while it polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
  pub payment_intent_id: i64,
  pub checkout_request_id: String,
  pub status: PaymentStatus,
  pub amount: Decimal,
  pub phone: String,
  #[serde(default)]
  pub order: Option<Order>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failure_reason: Option<String>,
  /// Only present while PENDING.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expired: Option<bool>,
  /// Suggested seconds until the next poll.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry_after: Option<u64>,
}

/// Pure snapshot; an old PENDING intent is reported as expired, never changed.
pub fn build_status_view(
  intent: &PaymentIntent,
  order: Option<Order>,
  now: DateTime<Utc>,
  settings: &PaymentSettings,
) -> PaymentStatusView {
  let (expired, retry_after) = match intent.status {
    PaymentStatus::Pending => {
      let expired = now - intent.created_at > settings.stale_after();
      (Some(expired), (!expired).then_some(settings.poll_interval_secs))
    }
    _ => (None, None),
  };

  PaymentStatusView {
    payment_intent_id: intent.id,
    checkout_request_id: intent.checkout_request_id.clone(),
    status: intent.status,
    amount: intent.amount,
    phone: intent.phone.clone(),
    order,
    failure_reason: intent.failure_reason().map(str::to_string),
    expired,
    retry_after,
  }
}

#[instrument(name = "status::payment_status", skip(state, requester), fields(requester = %requester.user_id))]
pub async fn payment_status(
  state: &AppState,
  checkout_request_id: &str,
  requester: &AuthenticatedUser,
) -> Result<PaymentStatusView> {
  let intent = state
    .intents
    .find_by_checkout_id(checkout_request_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("No payment found for checkout {}", checkout_request_id)))?;
  if !requester.can_access(intent.buyer_id) {
    return Err(AppError::Forbidden("This payment belongs to another customer".to_string()));
  }

  let order = match intent.order_id {
    Some(order_id) => state.orders.find_order(order_id).await?,
    None => None,
  };
  let view = build_status_view(&intent, order, state.clock.now(), &state.config.payments);
  debug!(status = %view.status, expired = ?view.expired, "Payment status read.");
  Ok(view)
}
