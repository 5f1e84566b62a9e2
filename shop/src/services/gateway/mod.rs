// shop/src/services/gateway/mod.rs

//! Mobile-money push gateway: the trait the payment flows call, the Daraja
//! client behind it, and the callback body the gateway posts back.

pub mod callback;
pub mod daraja;
pub mod mock;
pub mod phone;
pub mod token_cache;

use crate::config::{MpesaConfig, MpesaEnvironment};
use crate::errors::Result as AppResult;
use crate::services::clock::Clock;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use daraja::DarajaClient;
pub use mock::{MockBehavior, MockGateway};
pub use phone::normalize_phone;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
  /// Credentials were refused or the token endpoint was unreachable.
  #[error("gateway authentication failed: {0}")]
  Auth(String),
  #[error("gateway request failed: {0}")]
  Request(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
  /// Exact amount; rounded to whole shillings on the wire.
  pub amount: Decimal,
  /// Already normalized to `254…`.
  pub phone: String,
  pub account_reference: String,
  pub description: String,
}

/// The gateway's synchronous answer to a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
  pub response_code: String,
  pub response_description: String,
  pub merchant_request_id: String,
  pub checkout_request_id: String,
  #[serde(default)]
  pub customer_message: Option<String>,
}

impl PushResponse {
  pub fn is_accepted(&self) -> bool {
    self.response_code.trim() == "0"
  }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
  /// Sends a payment prompt to the buyer's phone.
  async fn initiate_push(&self, request: PushRequest) -> Result<PushResponse, GatewayError>;

  fn name(&self) -> &'static str;
}

/// Picks the gateway implementation for the configured environment.
pub fn build_gateway(config: &MpesaConfig, clock: Arc<dyn Clock>) -> AppResult<Arc<dyn PaymentGateway>> {
  match config.environment {
    MpesaEnvironment::Mock => {
      tracing::warn!("M-Pesa gateway running in mock mode; no prompts will reach real phones.");
      Ok(Arc::new(MockGateway::default()))
    }
    MpesaEnvironment::Sandbox | MpesaEnvironment::Production => {
      Ok(Arc::new(DarajaClient::new(config.clone(), clock)?))
    }
  }
}
