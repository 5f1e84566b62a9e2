// shop/src/pipelines/initiate_pipeline.rs

use crate::errors::{AppError, Result as AppResult};
use crate::models::payment_intent::generate_order_reference;
use crate::models::{AuthenticatedUser, CheckoutRequest, IntentPayload};
use crate::pipelines::common_steps;
use crate::pipelines::contexts::{InitiatePaymentCtxData, PaymentInitiation};
use crate::services::stock;
use crate::state::AppState;
use hera_flow::{ContextData, FlowRegistry, Pipeline, PipelineControl, PipelineResult};
use serde_json::Map;
use tracing::{info, instrument};

pub fn register_initiate_pipeline(flows: &FlowRegistry<AppError>) {
  let mut p = Pipeline::<InitiatePaymentCtxData, AppError>::new(&[
    ("validate_request", false, None),
    ("price_cart", false, None),
    ("issue_push", false, None),
    ("persist_intent", false, None),
  ]);

  p.on_step("validate_request", validate_request);
  p.on_step("price_cart", price_cart);
  p.on_step("issue_push", issue_push);
  p.on_step("persist_intent", persist_intent);
  p.after_step("persist_intent", |ctx: ContextData<InitiatePaymentCtxData>| async move {
    let guard = ctx.read();
    if let Some(intent) = guard.intent.as_ref() {
      info!(
        payment_intent_id = intent.id,
        checkout_request_id = %intent.checkout_request_id,
        buyer_id = %guard.buyer.user_id,
        "Payment initiated; waiting for callback."
      );
    }
    Ok::<_, AppError>(PipelineControl::Continue)
  });

  flows.register(p);
}

async fn validate_request(ctx: ContextData<InitiatePaymentCtxData>) -> AppResult<PipelineControl> {
  let (request, raw_phone) = {
    let guard = ctx.read();
    let raw_phone = guard
      .request
      .phone
      .clone()
      .filter(|p| !p.trim().is_empty())
      .unwrap_or_else(|| guard.request.customer.phone.clone());
    (guard.request.clone(), raw_phone)
  };

  if request.items.is_empty() {
    return Err(AppError::Validation("Cart is empty".to_string()));
  }
  if request.customer.name.trim().is_empty() {
    return Err(AppError::Validation("Customer name is required".to_string()));
  }
  if !request.customer.email.contains('@') {
    return Err(AppError::Validation("A valid customer email is required".to_string()));
  }
  if request.shipping.address.trim().is_empty() || request.shipping.city.trim().is_empty() {
    return Err(AppError::Validation("Shipping address and city are required".to_string()));
  }

  let phone = common_steps::normalize_buyer_phone(&raw_phone)?;
  ctx.write().phone = Some(phone);
  Ok(PipelineControl::Continue)
}

async fn price_cart(ctx: ContextData<InitiatePaymentCtxData>) -> AppResult<PipelineControl> {
  let (app_state, request) = {
    let guard = ctx.read();
    (guard.app_state.clone(), guard.request.clone())
  };

  let resolved = stock::resolve_lines(app_state.catalog.as_ref(), &request.items).await?;
  let (items, amounts) = stock::price_lines(&resolved, app_state.config.payments.shipping_flat_fee);
  let payload = IntentPayload {
    order_reference: generate_order_reference(),
    items,
    customer: request.customer,
    shipping: request.shipping,
    amounts,
    transaction: None,
    failure: None,
    retried_from: None,
    retried_to: None,
    extra: Map::new(),
  };
  ctx.write().payload = Some(payload);
  Ok(PipelineControl::Continue)
}

async fn issue_push(ctx: ContextData<InitiatePaymentCtxData>) -> AppResult<PipelineControl> {
  let (app_state, phone, payload) = {
    let guard = ctx.read();
    (guard.app_state.clone(), guard.phone.clone(), guard.payload.clone())
  };
  let (phone, payload) = phone
    .zip(payload)
    .ok_or_else(|| AppError::Internal("issue_push ran before the cart was priced".to_string()))?;

  let push = common_steps::issue_push(&app_state, &phone, &payload).await?;
  ctx.write().push = Some(push);
  Ok(PipelineControl::Continue)
}

async fn persist_intent(ctx: ContextData<InitiatePaymentCtxData>) -> AppResult<PipelineControl> {
  let (app_state, buyer_id, phone, payload, push) = {
    let guard = ctx.read();
    (
      guard.app_state.clone(),
      guard.buyer.user_id,
      guard.phone.clone(),
      guard.payload.clone(),
      guard.push.clone(),
    )
  };
  let ((phone, payload), push) = phone
    .zip(payload)
    .zip(push)
    .ok_or_else(|| AppError::Internal("persist_intent ran before the push was issued".to_string()))?;

  let intent = common_steps::persist_intent(&app_state, buyer_id, &phone, payload, &push).await?;
  ctx.write().intent = Some(intent);
  Ok(PipelineControl::Continue)
}

/// Validates the cart, pushes the payment prompt and records a PENDING intent.
#[instrument(name = "payments::initiate", skip(app_state, request), fields(buyer_id = %buyer.user_id, lines = request.items.len()))]
pub async fn initiate_payment(
  app_state: &AppState,
  buyer: AuthenticatedUser,
  request: CheckoutRequest,
) -> AppResult<PaymentInitiation> {
  let ctx = ContextData::new(InitiatePaymentCtxData::new(app_state.clone(), buyer, request));
  match app_state.flows.run(ctx.clone()).await? {
    PipelineResult::Completed => ctx.read().receipt(),
    PipelineResult::Stopped => Err(AppError::PipelineHaltedByHandler),
  }
}
