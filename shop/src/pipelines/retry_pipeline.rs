// shop/src/pipelines/retry_pipeline.rs

use crate::errors::{AppError, Result as AppResult};
use crate::models::payment_intent::generate_order_reference;
use crate::models::{AuthenticatedUser, FailureInfo, FailureKind, PaymentStatus};
use crate::pipelines::common_steps;
use crate::pipelines::contexts::{PaymentInitiation, RetryPaymentCtxData};
use crate::services::stock;
use crate::state::AppState;
use hera_flow::{ContextData, FlowRegistry, Pipeline, PipelineControl, PipelineResult};
use tracing::{error, info, instrument, warn};

pub fn register_retry_pipeline(flows: &FlowRegistry<AppError>) {
  let mut p = Pipeline::<RetryPaymentCtxData, AppError>::new(&[
    ("load_original", false, None),
    ("authorize_requester", false, None),
    ("check_retryable", false, None),
    ("revalidate_stock", false, None),
    ("issue_push", false, None),
    ("persist_intent", false, None),
  ]);

  p.on_step("load_original", load_original);
  p.on_step("authorize_requester", authorize_requester);
  p.on_step("check_retryable", check_retryable);
  p.on_step("revalidate_stock", revalidate_stock);
  p.on_step("issue_push", issue_push);
  p.on_step("persist_intent", persist_intent);
  p.after_step("persist_intent", link_original);

  flows.register(p);
}

async fn load_original(ctx: ContextData<RetryPaymentCtxData>) -> AppResult<PipelineControl> {
  let (app_state, intent_id) = {
    let guard = ctx.read();
    (guard.app_state.clone(), guard.original_intent_id)
  };
  let original = app_state
    .intents
    .find_by_id(intent_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Payment intent {} not found", intent_id)))?;
  ctx.write().original = Some(original);
  Ok(PipelineControl::Continue)
}

async fn authorize_requester(ctx: ContextData<RetryPaymentCtxData>) -> AppResult<PipelineControl> {
  let guard = ctx.read();
  let owner = guard.original.as_ref().map(|i| i.buyer_id);
  match owner {
    Some(owner) if guard.requester.can_access(owner) => Ok(PipelineControl::Continue),
    Some(_) => {
      warn!(
        requester = %guard.requester.user_id,
        payment_intent_id = guard.original_intent_id,
        "Retry refused: requester does not own the payment."
      );
      Err(AppError::Forbidden("Only the buyer or an admin can retry this payment".to_string()))
    }
    None => Err(AppError::Internal("authorize_requester ran without an intent".to_string())),
  }
}

async fn check_retryable(ctx: ContextData<RetryPaymentCtxData>) -> AppResult<PipelineControl> {
  let (status, retried_to) = {
    let guard = ctx.read();
    let original = guard.original.as_ref();
    (original.map(|i| i.status), original.and_then(|i| i.payload.retried_to))
  };
  match status {
    Some(PaymentStatus::Failed) => match retried_to {
      Some(retry_id) => Err(AppError::Validation(format!(
        "This payment was already retried as payment {}",
        retry_id
      ))),
      None => Ok(PipelineControl::Continue),
    },
    Some(PaymentStatus::Success) => Err(AppError::Validation(
      "This payment has already been completed and cannot be retried".to_string(),
    )),
    Some(PaymentStatus::Pending) => Err(AppError::Validation(
      "This payment is still awaiting confirmation; wait for it to finish before retrying".to_string(),
    )),
    None => Err(AppError::Internal("check_retryable ran without an intent".to_string())),
  }
}

/// The retry keeps the prices the buyer originally saw; only stock is checked again.
async fn revalidate_stock(ctx: ContextData<RetryPaymentCtxData>) -> AppResult<PipelineControl> {
  let (app_state, original, phone_override) = {
    let guard = ctx.read();
    (guard.app_state.clone(), guard.original.clone(), guard.phone_override.clone())
  };
  let original = original.ok_or_else(|| AppError::Internal("revalidate_stock ran without an intent".to_string()))?;

  let lines = stock::lines_from_payload(&original.payload);
  stock::validate_stock(app_state.catalog.as_ref(), &lines).await?;

  let phone = match phone_override.filter(|p| !p.trim().is_empty()) {
    Some(raw) => common_steps::normalize_buyer_phone(&raw)?,
    None => original.phone.clone(),
  };
  let payload = original.payload.for_retry(generate_order_reference(), original.id);

  let mut guard = ctx.write();
  guard.phone = Some(phone);
  guard.payload = Some(payload);
  Ok(PipelineControl::Continue)
}

async fn issue_push(ctx: ContextData<RetryPaymentCtxData>) -> AppResult<PipelineControl> {
  let (app_state, phone, payload) = {
    let guard = ctx.read();
    (guard.app_state.clone(), guard.phone.clone(), guard.payload.clone())
  };
  let (phone, payload) = phone
    .zip(payload)
    .ok_or_else(|| AppError::Internal("issue_push ran before the retry payload was built".to_string()))?;

  let push = common_steps::issue_push(&app_state, &phone, &payload).await?;
  ctx.write().push = Some(push);
  Ok(PipelineControl::Continue)
}

async fn persist_intent(ctx: ContextData<RetryPaymentCtxData>) -> AppResult<PipelineControl> {
  let (app_state, buyer_id, phone, payload, push) = {
    let guard = ctx.read();
    // The new attempt belongs to the original buyer, even when an admin retries it.
    let buyer_id = guard.original.as_ref().map(|i| i.buyer_id);
    (
      guard.app_state.clone(),
      buyer_id,
      guard.phone.clone(),
      guard.payload.clone(),
      guard.push.clone(),
    )
  };
  let (((buyer_id, phone), payload), push) = buyer_id
    .zip(phone)
    .zip(payload)
    .zip(push)
    .ok_or_else(|| AppError::Internal("persist_intent ran before the push was issued".to_string()))?;

  let intent = common_steps::persist_intent(&app_state, buyer_id, &phone, payload, &push).await?;
  ctx.write().intent = Some(intent);
  Ok(PipelineControl::Continue)
}

/// Only one retry may hang off a FAILED intent. A retry that loses the link to a
/// concurrent one is closed so it can never turn into a second order.
async fn link_original(ctx: ContextData<RetryPaymentCtxData>) -> AppResult<PipelineControl> {
  let (app_state, original_id, new_intent) = {
    let guard = ctx.read();
    (guard.app_state.clone(), guard.original_intent_id, guard.intent.clone())
  };
  let new_intent =
    new_intent.ok_or_else(|| AppError::Internal("link_original ran without a new intent".to_string()))?;

  match app_state.intents.link_retry(original_id, new_intent.id).await {
    Ok(true) => {
      info!(retried_from = original_id, retried_to = new_intent.id, "Payment retry linked to original intent.");
      Ok(PipelineControl::Continue)
    }
    Ok(false) => {
      warn!(
        retried_from = original_id,
        payment_intent_id = new_intent.id,
        "Original intent already has a retry; closing this one."
      );
      let failure = FailureInfo {
        reason: "Superseded by another retry of the same payment".to_string(),
        kind: FailureKind::Superseded,
        requires_refund: false,
        failed_at: app_state.clock.now(),
      };
      if let Err(e) = app_state.intents.transition_to_failed(new_intent.id, failure, None).await {
        error!(payment_intent_id = new_intent.id, error = %e, "Could not close superseded retry intent.");
      }
      Err(AppError::Validation("This payment has already been retried".to_string()))
    }
    Err(e) => {
      // The push is out and the new intent is stored; the receipt still goes back.
      error!(
        retried_from = original_id,
        retried_to = new_intent.id,
        error = %e,
        "Retry issued but the original intent could not be linked."
      );
      Ok(PipelineControl::Continue)
    }
  }
}

/// Issues a new push for a FAILED intent and links the two intents.
#[instrument(name = "payments::retry", skip(app_state, phone_override), fields(requester = %requester.user_id))]
pub async fn retry_payment(
  app_state: &AppState,
  requester: AuthenticatedUser,
  payment_intent_id: i64,
  phone_override: Option<String>,
) -> AppResult<PaymentInitiation> {
  let ctx = ContextData::new(RetryPaymentCtxData::new(
    app_state.clone(),
    requester,
    payment_intent_id,
    phone_override,
  ));
  match app_state.flows.run(ctx.clone()).await? {
    PipelineResult::Completed => ctx.read().receipt(),
    PipelineResult::Stopped => Err(AppError::PipelineHaltedByHandler),
  }
}
