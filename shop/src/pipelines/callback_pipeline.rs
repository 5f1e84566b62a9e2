// shop/src/pipelines/callback_pipeline.rs

//! Gateway callback handling: `PENDING -> SUCCESS | FAILED`, at most once per intent.

use crate::errors::{AppError, Result as AppResult};
use crate::models::{FailureInfo, FailureKind, PaymentStatus, TransitionOutcome};
use crate::pipelines::contexts::{CallbackCtxData, CallbackOutcome};
use crate::services::gateway::callback::{parse_callback, CallbackAck};
use crate::services::notifications::{self, dispatch};
use crate::services::orders;
use crate::state::AppState;
use crate::store::{OrderOutcome, Settlement};
use actix_web::web::Bytes;
use hera_flow::{ContextData, FlowRegistry, Pipeline, PipelineControl, SkipCondition};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub fn register_callback_pipeline(flows: &FlowRegistry<AppError>) {
  let unless_success: SkipCondition<CallbackCtxData> =
    Arc::new(|ctx: ContextData<CallbackCtxData>| !ctx.read().is_success_callback());
  let if_success: SkipCondition<CallbackCtxData> =
    Arc::new(|ctx: ContextData<CallbackCtxData>| ctx.read().is_success_callback());

  let mut p = Pipeline::<CallbackCtxData, AppError>::new(&[
    ("parse_callback", false, None),
    ("resolve_intent", false, None),
    ("guard_pending", false, None),
    ("settle_success", false, Some(unless_success)),
    ("settle_failure", false, Some(if_success)),
    ("notify_outcome", true, None),
  ]);

  p.on_step("parse_callback", parse_body);
  p.on_step("resolve_intent", resolve_intent);
  p.on_step("guard_pending", guard_pending);
  p.on_step("settle_success", settle_success);
  p.on_step("settle_failure", settle_failure);
  p.on_step("notify_outcome", notify_outcome);

  flows.register(p);
}

fn raw_text(raw: &Bytes) -> String {
  String::from_utf8_lossy(raw).into_owned()
}

async fn parse_body(ctx: ContextData<CallbackCtxData>) -> AppResult<PipelineControl> {
  let raw = ctx.read().raw_body.clone();
  match parse_callback(&raw) {
    Ok(callback) => {
      info!(
        checkout_request_id = %callback.checkout_request_id,
        result_code = callback.result_code,
        result_desc = %callback.result_desc,
        "Payment callback received."
      );
      ctx.write().callback = Some(callback);
      Ok(PipelineControl::Continue)
    }
    Err(e) => {
      warn!(error = %e, raw_body = %raw_text(&raw), "Ignoring malformed payment callback.");
      ctx.write().outcome = CallbackOutcome::Malformed;
      Ok(PipelineControl::Stop)
    }
  }
}

async fn resolve_intent(ctx: ContextData<CallbackCtxData>) -> AppResult<PipelineControl> {
  let (app_state, checkout_request_id) = {
    let guard = ctx.read();
    let checkout_request_id = guard.callback.as_ref().map(|c| c.checkout_request_id.clone());
    (guard.app_state.clone(), checkout_request_id)
  };
  let checkout_request_id =
    checkout_request_id.ok_or_else(|| AppError::Internal("resolve_intent ran without a parsed callback".to_string()))?;

  let intent = app_state.intents.find_by_checkout_id(&checkout_request_id).await?;
  let mut guard = ctx.write();
  match intent {
    Some(intent) => {
      guard.intent = Some(intent);
      Ok(PipelineControl::Continue)
    }
    None => {
      warn!(%checkout_request_id, "Callback for unknown checkout request; acknowledging.");
      guard.outcome = CallbackOutcome::UnknownCheckout;
      Ok(PipelineControl::Stop)
    }
  }
}

async fn guard_pending(ctx: ContextData<CallbackCtxData>) -> AppResult<PipelineControl> {
  let (app_state, intent, is_success, raw) = {
    let guard = ctx.read();
    (
      guard.app_state.clone(),
      guard.intent.clone(),
      guard.is_success_callback(),
      guard.raw_body.clone(),
    )
  };
  let intent = intent.ok_or_else(|| AppError::Internal("guard_pending ran without an intent".to_string()))?;
  if intent.status == PaymentStatus::Pending {
    return Ok(PipelineControl::Continue);
  }

  if is_success && intent.status == PaymentStatus::Failed {
    // Money arrived for an intent that was already closed, e.g. by the expiry sweep.
    error!(
      payment_intent_id = intent.id,
      checkout_request_id = %intent.checkout_request_id,
      failure_reason = ?intent.failure_reason(),
      raw_body = %raw_text(&raw),
      "Success callback for a FAILED intent; flagging for refund review."
    );
    dispatch(
      app_state.notifier.clone(),
      notifications::refund_review(
        &intent,
        &app_state.config.admin_email,
        "Payment confirmed by the gateway after the intent was marked FAILED",
      ),
    );
  } else {
    info!(
      payment_intent_id = intent.id,
      status = %intent.status,
      "Duplicate callback for a settled intent; acknowledging."
    );
  }
  ctx.write().outcome = CallbackOutcome::AlreadyResolved(intent.status);
  Ok(PipelineControl::Stop)
}

async fn settle_success(ctx: ContextData<CallbackCtxData>) -> AppResult<PipelineControl> {
  let (app_state, intent, callback, raw) = {
    let guard = ctx.read();
    (
      guard.app_state.clone(),
      guard.intent.clone(),
      guard.callback.clone(),
      guard.raw_body.clone(),
    )
  };
  let (intent, callback) = intent
    .zip(callback)
    .ok_or_else(|| AppError::Internal("settle_success ran without an intent".to_string()))?;
  let metadata = callback.transaction_metadata();
  if let Some(paid) = metadata.amount {
    if paid != intent.amount.round() && paid != intent.amount {
      warn!(payment_intent_id = intent.id, %paid, expected = %intent.amount, "Callback amount differs from intent amount.");
    }
  }

  let settlement = Settlement {
    intent_id: intent.id,
    metadata: metadata.clone(),
  };
  let result = orders::materialize_order(
    app_state.orders.as_ref(),
    app_state.clock.as_ref(),
    intent.buyer_id,
    &intent.payload,
    Some(settlement),
  )
  .await;

  match result {
    Ok(OrderOutcome::Created(order)) => {
      info!(
        payment_intent_id = intent.id,
        order_number = %order.order_number,
        receipt = ?metadata.receipt_number,
        "Payment settled; intent SUCCESS."
      );
      let mut guard = ctx.write();
      guard.outcome = CallbackOutcome::Paid {
        order_number: order.order_number.clone(),
      };
      guard.order = Some(order);
      Ok(PipelineControl::Continue)
    }
    Ok(OrderOutcome::AlreadySettled(status)) => {
      info!(payment_intent_id = intent.id, %status, "Intent settled by a concurrent callback.");
      ctx.write().outcome = CallbackOutcome::AlreadyResolved(status);
      Ok(PipelineControl::Stop)
    }
    // Storage trouble: let the gateway redeliver rather than fail a paid intent.
    Err(e @ AppError::Sqlx(_)) => Err(e),
    Err(e) => {
      error!(
        payment_intent_id = intent.id,
        checkout_request_id = %intent.checkout_request_id,
        error = %e,
        raw_body = %raw_text(&raw),
        "Paid intent could not be turned into an order; marking FAILED for refund review."
      );
      let kind = if e.is_stock_conflict() {
        FailureKind::StockConflict
      } else {
        FailureKind::MaterializationError
      };
      let failure = FailureInfo {
        reason: e.to_string(),
        kind,
        requires_refund: true,
        failed_at: app_state.clock.now(),
      };
      let reason = failure.reason.clone();
      let outcome = match app_state.intents.transition_to_failed(intent.id, failure, Some(metadata)).await {
        Ok(TransitionOutcome::Applied) => CallbackOutcome::Failed {
          reason,
          requires_refund: true,
        },
        Ok(TransitionOutcome::Unchanged(status)) => CallbackOutcome::AlreadyResolved(status),
        Err(AppError::InvalidTransition(_)) => CallbackOutcome::AlreadyResolved(PaymentStatus::Success),
        Err(other) => return Err(other),
      };
      let stop = matches!(outcome, CallbackOutcome::AlreadyResolved(_));
      ctx.write().outcome = outcome;
      Ok(if stop { PipelineControl::Stop } else { PipelineControl::Continue })
    }
  }
}

async fn settle_failure(ctx: ContextData<CallbackCtxData>) -> AppResult<PipelineControl> {
  let (app_state, intent, callback) = {
    let guard = ctx.read();
    (guard.app_state.clone(), guard.intent.clone(), guard.callback.clone())
  };
  let (intent, callback) = intent
    .zip(callback)
    .ok_or_else(|| AppError::Internal("settle_failure ran without an intent".to_string()))?;

  let reason = if callback.result_desc.trim().is_empty() {
    format!("Payment failed with result code {}", callback.result_code)
  } else {
    callback.result_desc.clone()
  };
  let failure = FailureInfo {
    reason: reason.clone(),
    kind: callback.failure_kind(),
    requires_refund: false,
    failed_at: app_state.clock.now(),
  };

  let outcome = match app_state
    .intents
    .transition_to_failed(intent.id, failure, Some(callback.transaction_metadata()))
    .await
  {
    Ok(TransitionOutcome::Applied) => {
      info!(
        payment_intent_id = intent.id,
        result_code = callback.result_code,
        %reason,
        "Payment failed; intent FAILED."
      );
      CallbackOutcome::Failed {
        reason,
        requires_refund: false,
      }
    }
    Ok(TransitionOutcome::Unchanged(status)) => CallbackOutcome::AlreadyResolved(status),
    Err(AppError::InvalidTransition(_)) => {
      warn!(payment_intent_id = intent.id, "Failure callback for an intent that already succeeded.");
      CallbackOutcome::AlreadyResolved(PaymentStatus::Success)
    }
    Err(e) => return Err(e),
  };
  let stop = matches!(outcome, CallbackOutcome::AlreadyResolved(_));
  ctx.write().outcome = outcome;
  Ok(if stop { PipelineControl::Stop } else { PipelineControl::Continue })
}

async fn notify_outcome(ctx: ContextData<CallbackCtxData>) -> AppResult<PipelineControl> {
  let (app_state, intent, order, outcome) = {
    let guard = ctx.read();
    (
      guard.app_state.clone(),
      guard.intent.clone(),
      guard.order.clone(),
      guard.outcome.clone(),
    )
  };
  let Some(intent) = intent else {
    return Ok(PipelineControl::Continue);
  };
  let notifier = app_state.notifier.clone();

  match (&outcome, order) {
    (CallbackOutcome::Paid { .. }, Some(order)) => {
      dispatch(notifier, notifications::payment_succeeded(&intent, &order));
    }
    (CallbackOutcome::Failed { reason, requires_refund }, _) => {
      dispatch(notifier.clone(), notifications::payment_failed(&intent, reason));
      if *requires_refund {
        dispatch(
          notifier,
          notifications::refund_review(&intent, &app_state.config.admin_email, reason),
        );
      }
    }
    _ => {}
  }
  Ok(PipelineControl::Continue)
}

/// Runs the callback pipeline. Every handled case yields a `ResultCode 0` ack;
/// only unexpected internal errors come back as `Err`.
#[instrument(name = "payments::handle_callback", skip(app_state, raw_body), fields(body_len = raw_body.len()))]
pub async fn handle_callback(app_state: &AppState, raw_body: Bytes) -> AppResult<(CallbackOutcome, CallbackAck)> {
  let ctx = ContextData::new(CallbackCtxData::new(app_state.clone(), raw_body));
  app_state.flows.run(ctx.clone()).await?;
  let outcome = ctx.read().outcome.clone();
  let ack = outcome.ack();
  Ok((outcome, ack))
}
