// shop/src/pipelines/common_steps.rs

//! Steps shared by the initiation and retry pipelines.

use crate::errors::{AppError, Result as AppResult};
use crate::models::{IntentPayload, NewPaymentIntent, PaymentIntent};
use crate::services::gateway::{normalize_phone, PushRequest, PushResponse};
use crate::state::AppState;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const PUSH_DESCRIPTION: &str = "Hera Order";

pub fn normalize_buyer_phone(raw: &str) -> AppResult<String> {
  normalize_phone(raw).ok_or_else(|| {
    AppError::Validation(format!(
      "Invalid phone number '{}'. Use a Safaricom number such as 0712345678.",
      raw.trim()
    ))
  })
}

/// Sends the push for `payload`'s total; a non-zero response code is a rejection.
#[instrument(name = "common_step::issue_push", skip(app_state, payload), fields(order_reference = %payload.order_reference))]
pub async fn issue_push(app_state: &AppState, phone: &str, payload: &IntentPayload) -> AppResult<PushResponse> {
  if payload.amounts.total <= rust_decimal::Decimal::ZERO {
    return Err(AppError::Validation("Order total must be greater than zero".to_string()));
  }
  let request = PushRequest {
    amount: payload.amounts.total,
    phone: phone.to_string(),
    account_reference: payload.order_reference.clone(),
    description: PUSH_DESCRIPTION.to_string(),
  };
  let response = app_state.gateway.initiate_push(request).await?;
  if !response.is_accepted() {
    warn!(
      response_code = %response.response_code,
      description = %response.response_description,
      "Gateway rejected the push."
    );
    return Err(AppError::PushRejected {
      code: response.response_code,
      description: response.response_description,
    });
  }
  info!(checkout_request_id = %response.checkout_request_id, gateway = app_state.gateway.name(), "Push accepted.");
  Ok(response)
}

/// Records a PENDING intent for an accepted push.
#[instrument(
  name = "common_step::persist_intent",
  skip(app_state, phone, payload, push),
  fields(checkout_request_id = %push.checkout_request_id)
)]
pub async fn persist_intent(
  app_state: &AppState,
  buyer_id: Uuid,
  phone: &str,
  payload: IntentPayload,
  push: &PushResponse,
) -> AppResult<PaymentIntent> {
  let new_intent = NewPaymentIntent {
    buyer_id,
    checkout_request_id: push.checkout_request_id.clone(),
    merchant_request_id: push.merchant_request_id.clone(),
    phone: phone.to_string(),
    amount: payload.amounts.total,
    payload,
  };
  let intent = app_state.intents.create_intent(new_intent).await.map_err(|e| {
    // The buyer may already be looking at a prompt for this push.
    tracing::error!(error = %e, checkout_request_id = %push.checkout_request_id, "Push accepted but intent could not be stored.");
    e
  })?;
  info!(payment_intent_id = intent.id, amount = %intent.amount, "Payment intent created as PENDING.");
  Ok(intent)
}
