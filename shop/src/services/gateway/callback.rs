// shop/src/services/gateway/callback.rs

use crate::models::{FailureKind, TransactionMetadata};
use crate::serde_util::{lenient_i64, value_to_decimal, value_to_string};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Buyer dismissed or cancelled the prompt.
pub const RESULT_CANCELLED_BY_USER: i64 = 1032;

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
  #[serde(rename = "Body")]
  body: CallbackBody,
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
  #[serde(rename = "stkCallback")]
  stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallback {
  #[serde(rename = "MerchantRequestID", default)]
  pub merchant_request_id: Option<String>,
  #[serde(rename = "CheckoutRequestID")]
  pub checkout_request_id: String,
  #[serde(deserialize_with = "lenient_i64")]
  pub result_code: i64,
  #[serde(default)]
  pub result_desc: String,
  #[serde(default)]
  pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackMetadata {
  #[serde(default)]
  pub item: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetadataItem {
  pub name: String,
  #[serde(default)]
  pub value: Option<Value>,
}

impl CallbackMetadata {
  fn value(&self, name: &str) -> Option<&Value> {
    self
      .item
      .iter()
      .find(|item| item.name.eq_ignore_ascii_case(name))
      .and_then(|item| item.value.as_ref())
  }

  pub fn amount(&self) -> Option<Decimal> {
    self.value("Amount").and_then(value_to_decimal)
  }

  pub fn receipt_number(&self) -> Option<String> {
    self.value("MpesaReceiptNumber").and_then(value_to_string)
  }

  /// The gateway sends `20240309103512` as a number.
  pub fn transaction_date(&self) -> Option<NaiveDateTime> {
    let raw = self.value("TransactionDate").and_then(value_to_string)?;
    NaiveDateTime::parse_from_str(&raw, "%Y%m%d%H%M%S").ok()
  }

  pub fn phone_number(&self) -> Option<String> {
    self.value("PhoneNumber").and_then(value_to_string)
  }
}

impl StkCallback {
  pub fn is_success(&self) -> bool {
    self.result_code == 0
  }

  pub fn failure_kind(&self) -> FailureKind {
    if self.result_code == RESULT_CANCELLED_BY_USER {
      FailureKind::Cancelled
    } else {
      FailureKind::GatewayFailure
    }
  }

  pub fn transaction_metadata(&self) -> TransactionMetadata {
    let metadata = self.callback_metadata.clone().unwrap_or_default();
    TransactionMetadata {
      merchant_request_id: self.merchant_request_id.clone(),
      result_code: self.result_code,
      result_desc: self.result_desc.clone(),
      receipt_number: metadata.receipt_number(),
      amount: metadata.amount(),
      transaction_date: metadata.transaction_date(),
      phone_number: metadata.phone_number(),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackParseError {
  #[error("callback body is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("callback carries no checkout request id")]
  MissingCheckoutId,
}

pub fn parse_callback(body: &[u8]) -> Result<StkCallback, CallbackParseError> {
  let envelope: CallbackEnvelope = serde_json::from_slice(body)?;
  let callback = envelope.body.stk_callback;
  if callback.checkout_request_id.trim().is_empty() {
    return Err(CallbackParseError::MissingCheckoutId);
  }
  Ok(callback)
}

/// Acknowledgement body returned to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAck {
  #[serde(rename = "ResultCode")]
  pub result_code: i32,
  #[serde(rename = "ResultDesc")]
  pub result_desc: String,
}

impl CallbackAck {
  pub fn accepted(desc: impl Into<String>) -> Self {
    Self {
      result_code: 0,
      result_desc: desc.into(),
    }
  }

  pub fn failed(desc: impl Into<String>) -> Self {
    Self {
      result_code: 1,
      result_desc: desc.into(),
    }
  }
}
