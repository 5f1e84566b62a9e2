// shop/src/services/gateway/daraja.rs

use super::token_cache::TokenCache;
use super::{GatewayError, PaymentGateway, PushRequest, PushResponse};
use crate::config::MpesaConfig;
use crate::errors::{AppError, Result as AppResult};
use crate::serde_util::{lenient_string, value_to_i64};
use crate::services::clock::Clock;
use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use chrono::Duration;
use reqwest::StatusCode;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const ACCOUNT_REFERENCE_MAX: usize = 12;
const TRANSACTION_DESC_MAX: usize = 13;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3599;

#[derive(Debug, Deserialize)]
struct TokenReply {
  access_token: String,
  #[serde(default)]
  expires_in: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushBody<'a> {
  business_short_code: &'a str,
  password: String,
  timestamp: String,
  transaction_type: &'a str,
  amount: i64,
  party_a: &'a str,
  party_b: &'a str,
  phone_number: &'a str,
  #[serde(rename = "CallBackURL")]
  call_back_url: &'a str,
  account_reference: String,
  transaction_desc: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushReply {
  #[serde(rename = "MerchantRequestID")]
  merchant_request_id: String,
  #[serde(rename = "CheckoutRequestID")]
  checkout_request_id: String,
  #[serde(deserialize_with = "lenient_string")]
  response_code: String,
  response_description: String,
  #[serde(default)]
  customer_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorReply {
  #[serde(default)]
  request_id: Option<String>,
  #[serde(default)]
  error_code: Option<String>,
  #[serde(default)]
  error_message: Option<String>,
}

fn truncate(value: &str, max: usize) -> String {
  value.chars().take(max).collect()
}

/// Safaricom Daraja STK Push client.
pub struct DarajaClient {
  http: reqwest::Client,
  config: MpesaConfig,
  tokens: TokenCache,
  clock: Arc<dyn Clock>,
}

impl DarajaClient {
  pub fn new(config: MpesaConfig, clock: Arc<dyn Clock>) -> AppResult<Self> {
    let http = reqwest::Client::builder()
      .timeout(std::time::Duration::from_secs(30))
      .build()
      .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
    Ok(Self {
      http,
      tokens: TokenCache::new(clock.clone(), Duration::seconds(60)),
      config,
      clock,
    })
  }

  /// `YYYYMMDDHHmmss` in East Africa Time (UTC+3).
  fn timestamp(&self) -> String {
    (self.clock.now() + Duration::hours(3)).format("%Y%m%d%H%M%S").to_string()
  }

  fn password(&self, timestamp: &str) -> String {
    BASE64_STANDARD.encode(format!("{}{}{}", self.config.shortcode, self.config.passkey, timestamp))
  }

  async fn access_token(&self) -> Result<String, GatewayError> {
    self.tokens.get_or_refresh(|| self.request_token()).await
  }

  #[instrument(name = "daraja::request_token", skip(self))]
  async fn request_token(&self) -> Result<(String, i64), GatewayError> {
    let url = format!("{}/oauth/v1/generate?grant_type=client_credentials", self.config.base_url);
    let response = self
      .http
      .get(&url)
      .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
      .send()
      .await
      .map_err(|e| GatewayError::Auth(format!("token request failed: {}", e)))?;

    if !response.status().is_success() {
      let status = response.status();
      let error_text = response.text().await.unwrap_or_default();
      warn!(%status, "Daraja token endpoint refused the credentials.");
      return Err(GatewayError::Auth(format!("token endpoint returned {}: {}", status, error_text)));
    }

    let reply: TokenReply = response
      .json()
      .await
      .map_err(|e| GatewayError::Auth(format!("unreadable token response: {}", e)))?;
    let expires_in = reply
      .expires_in
      .as_ref()
      .and_then(value_to_i64)
      .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    info!(expires_in, "Obtained Daraja access token.");
    Ok((reply.access_token, expires_in))
  }
}

#[async_trait]
impl PaymentGateway for DarajaClient {
  #[instrument(
    name = "daraja::initiate_push",
    skip(self, request),
    fields(account_reference = %request.account_reference, amount = %request.amount)
  )]
  async fn initiate_push(&self, request: PushRequest) -> Result<PushResponse, GatewayError> {
    let amount = request
      .amount
      .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
      .to_i64()
      .filter(|a| *a >= 1)
      .ok_or_else(|| GatewayError::Request(format!("amount {} is not payable", request.amount)))?;

    let token = self.access_token().await?;
    let timestamp = self.timestamp();
    let body = StkPushBody {
      business_short_code: &self.config.shortcode,
      password: self.password(&timestamp),
      timestamp,
      transaction_type: &self.config.transaction_type,
      amount,
      party_a: &request.phone,
      party_b: &self.config.shortcode,
      phone_number: &request.phone,
      call_back_url: &self.config.callback_url,
      account_reference: truncate(&request.account_reference, ACCOUNT_REFERENCE_MAX),
      transaction_desc: truncate(&request.description, TRANSACTION_DESC_MAX),
    };

    let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url);
    let response = self
      .http
      .post(&url)
      .bearer_auth(&token)
      .json(&body)
      .send()
      .await
      .map_err(|e| GatewayError::Request(format!("push request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
      let error_text = response.text().await.unwrap_or_default();
      let reply: ErrorReply = serde_json::from_str(&error_text).unwrap_or_default();
      warn!(%status, error_code = ?reply.error_code, request_id = ?reply.request_id, "Daraja refused the push.");
      if status == StatusCode::UNAUTHORIZED {
        self.tokens.invalidate().await;
        return Err(GatewayError::Auth(
          reply.error_message.unwrap_or_else(|| "access token rejected".to_string()),
        ));
      }
      return Err(GatewayError::Request(reply.error_message.unwrap_or(error_text)));
    }

    let reply: StkPushReply = response
      .json()
      .await
      .map_err(|e| GatewayError::Request(format!("unreadable push response: {}", e)))?;
    info!(
      checkout_request_id = %reply.checkout_request_id,
      response_code = %reply.response_code,
      "Daraja accepted the push request."
    );
    Ok(PushResponse {
      response_code: reply.response_code,
      response_description: reply.response_description,
      merchant_request_id: reply.merchant_request_id,
      checkout_request_id: reply.checkout_request_id,
      customer_message: reply.customer_message,
    })
  }

  fn name(&self) -> &'static str {
    "daraja"
  }
}
