// shop/src/pipelines/contexts.rs

//! Context data for the payment pipelines. Handlers receive these wrapped in
//! `hera_flow::ContextData`.

use crate::errors::{AppError, Result};
use crate::models::{AuthenticatedUser, CheckoutRequest, IntentPayload, Order, PaymentIntent, PaymentStatus};
use crate::services::gateway::callback::{CallbackAck, StkCallback};
use crate::services::gateway::PushResponse;
use crate::state::AppState;
use actix_web::web::Bytes;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const DEFAULT_INSTRUCTIONS: &str = "Check your phone and enter your M-Pesa PIN to complete the payment.";

/// Returned to the storefront once a push has been accepted and recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiation {
  pub checkout_request_id: String,
  pub merchant_request_id: String,
  pub payment_intent_id: i64,
  pub order_reference: String,
  pub amount: Decimal,
  pub instructions: String,
}

impl PaymentInitiation {
  fn from_parts(intent: Option<&PaymentIntent>, push: Option<&PushResponse>) -> Result<Self> {
    let (intent, push) = intent
      .zip(push)
      .ok_or_else(|| AppError::Internal("Payment pipeline finished without an intent".to_string()))?;
    Ok(Self {
      checkout_request_id: intent.checkout_request_id.clone(),
      merchant_request_id: intent.merchant_request_id.clone(),
      payment_intent_id: intent.id,
      order_reference: intent.payload.order_reference.clone(),
      amount: intent.amount,
      instructions: push
        .customer_message
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
    })
  }
}

#[derive(Clone)]
pub struct InitiatePaymentCtxData {
  pub app_state: AppState,
  pub buyer: AuthenticatedUser,
  pub request: CheckoutRequest,
  /// Normalized push number.
  pub phone: Option<String>,
  pub payload: Option<IntentPayload>,
  pub push: Option<PushResponse>,
  pub intent: Option<PaymentIntent>,
}

impl InitiatePaymentCtxData {
  pub fn new(app_state: AppState, buyer: AuthenticatedUser, request: CheckoutRequest) -> Self {
    Self {
      app_state,
      buyer,
      request,
      phone: None,
      payload: None,
      push: None,
      intent: None,
    }
  }

  pub fn receipt(&self) -> Result<PaymentInitiation> {
    PaymentInitiation::from_parts(self.intent.as_ref(), self.push.as_ref())
  }
}

/// How a callback was handled. Every variant is acknowledged with `ResultCode 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
  Undecided,
  Malformed,
  UnknownCheckout,
  AlreadyResolved(PaymentStatus),
  Paid { order_number: String },
  Failed { reason: String, requires_refund: bool },
}

impl CallbackOutcome {
  pub fn ack(&self) -> CallbackAck {
    match self {
      CallbackOutcome::Malformed => CallbackAck::accepted("Invalid callback ignored"),
      CallbackOutcome::UnknownCheckout => CallbackAck::accepted("Unknown checkout request"),
      CallbackOutcome::AlreadyResolved(_) => CallbackAck::accepted("Callback already processed"),
      CallbackOutcome::Paid { .. } => CallbackAck::accepted("Payment processed"),
      CallbackOutcome::Failed { .. } => CallbackAck::accepted("Payment failure recorded"),
      CallbackOutcome::Undecided => CallbackAck::accepted("Accepted"),
    }
  }
}

#[derive(Clone)]
pub struct CallbackCtxData {
  pub app_state: AppState,
  pub raw_body: Bytes,
  pub callback: Option<StkCallback>,
  pub intent: Option<PaymentIntent>,
  pub order: Option<Order>,
  pub outcome: CallbackOutcome,
}

impl CallbackCtxData {
  pub fn new(app_state: AppState, raw_body: Bytes) -> Self {
    Self {
      app_state,
      raw_body,
      callback: None,
      intent: None,
      order: None,
      outcome: CallbackOutcome::Undecided,
    }
  }

  pub fn is_success_callback(&self) -> bool {
    self.callback.as_ref().is_some_and(StkCallback::is_success)
  }
}

#[derive(Clone)]
pub struct RetryPaymentCtxData {
  pub app_state: AppState,
  pub requester: AuthenticatedUser,
  pub original_intent_id: i64,
  pub phone_override: Option<String>,
  pub original: Option<PaymentIntent>,
  pub phone: Option<String>,
  pub payload: Option<IntentPayload>,
  pub push: Option<PushResponse>,
  pub intent: Option<PaymentIntent>,
}

impl RetryPaymentCtxData {
  pub fn new(
    app_state: AppState,
    requester: AuthenticatedUser,
    original_intent_id: i64,
    phone_override: Option<String>,
  ) -> Self {
    Self {
      app_state,
      requester,
      original_intent_id,
      phone_override,
      original: None,
      phone: None,
      payload: None,
      push: None,
      intent: None,
    }
  }

  pub fn receipt(&self) -> Result<PaymentInitiation> {
    PaymentInitiation::from_parts(self.intent.as_ref(), self.push.as_ref())
  }
}
