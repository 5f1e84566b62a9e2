// shop/src/models/payment_intent.rs

use crate::models::cart_item::{CustomerInfo, ShippingInfo};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{FromRow, Type as SqlxType};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "payment_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
  Pending,
  Success,
  Failed,
}

impl PaymentStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, PaymentStatus::Pending)
  }
}

impl fmt::Display for PaymentStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      PaymentStatus::Pending => "PENDING",
      PaymentStatus::Success => "SUCCESS",
      PaymentStatus::Failed => "FAILED",
    };
    f.write_str(label)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
  Mpesa,
}

/// A cart line frozen at initiation time, prices included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadItem {
  pub product_id: Uuid,
  pub variant_id: Uuid,
  pub product_name: String,
  pub variant_name: String,
  pub sku: String,
  pub quantity: i32,
  pub unit_price: Decimal,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sale_price: Option<Decimal>,
}

impl PayloadItem {
  pub fn line_total(&self) -> Decimal {
    self.unit_price * Decimal::from(self.quantity)
  }

  pub fn line_discount(&self) -> Decimal {
    match self.sale_price {
      Some(sale) if sale < self.unit_price => (self.unit_price - sale) * Decimal::from(self.quantity),
      _ => Decimal::ZERO,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAmounts {
  pub subtotal: Decimal,
  pub shipping_fee: Decimal,
  pub discount: Decimal,
  pub total: Decimal,
}

impl OrderAmounts {
  /// `total = subtotal + shipping_fee - discount`, summed over the lines.
  pub fn from_items(items: &[PayloadItem], shipping_fee: Decimal) -> Self {
    let subtotal: Decimal = items.iter().map(PayloadItem::line_total).sum();
    let discount: Decimal = items.iter().map(PayloadItem::line_discount).sum();
    Self {
      subtotal,
      shipping_fee,
      discount,
      total: subtotal + shipping_fee - discount,
    }
  }
}

/// Result data reported by the gateway for a finished push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetadata {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub merchant_request_id: Option<String>,
  pub result_code: i64,
  pub result_desc: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub receipt_number: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub amount: Option<Decimal>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub transaction_date: Option<NaiveDateTime>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  /// The buyer dismissed the prompt on their phone.
  Cancelled,
  GatewayFailure,
  /// Paid, but stock ran out before the order could be created.
  StockConflict,
  /// Paid, but the order could not be created for another reason.
  MaterializationError,
  /// No callback arrived in time; closed by the sweeper.
  Expired,
  /// A concurrent retry of the same payment was linked first.
  Superseded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
  pub reason: String,
  pub kind: FailureKind,
  #[serde(default)]
  pub requires_refund: bool,
  pub failed_at: DateTime<Utc>,
}

/// Snapshot stored with each intent: the locked cart plus whatever the
/// callback and retry flows record later. Unknown keys are carried along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentPayload {
  pub order_reference: String,
  pub items: Vec<PayloadItem>,
  pub customer: CustomerInfo,
  pub shipping: ShippingInfo,
  pub amounts: OrderAmounts,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub transaction: Option<TransactionMetadata>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failure: Option<FailureInfo>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retried_from: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retried_to: Option<i64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl IntentPayload {
  /// Copy of the cart for a new attempt: fresh reference, outcome fields cleared.
  pub fn for_retry(&self, order_reference: String, retried_from: i64) -> Self {
    Self {
      order_reference,
      items: self.items.clone(),
      customer: self.customer.clone(),
      shipping: self.shipping.clone(),
      amounts: self.amounts.clone(),
      transaction: None,
      failure: None,
      retried_from: Some(retried_from),
      retried_to: None,
      extra: self.extra.clone(),
    }
  }
}

/// Keys to overlay on a stored payload. Absent fields leave stored keys untouched.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub transaction: Option<TransactionMetadata>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failure: Option<FailureInfo>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retried_from: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retried_to: Option<i64>,
}

impl PayloadPatch {
  pub fn transaction(metadata: TransactionMetadata) -> Self {
    Self {
      transaction: Some(metadata),
      ..Self::default()
    }
  }

  pub fn failure(failure: FailureInfo, metadata: Option<TransactionMetadata>) -> Self {
    Self {
      transaction: metadata,
      failure: Some(failure),
      ..Self::default()
    }
  }

  pub fn retried_to(intent_id: i64) -> Self {
    Self {
      retried_to: Some(intent_id),
      ..Self::default()
    }
  }

  pub fn to_value(&self) -> Result<Value, serde_json::Error> {
    serde_json::to_value(self)
  }

  /// Top-level merge, the same shape as Postgres `payload || patch`.
  pub fn apply_to(&self, payload: &IntentPayload) -> Result<IntentPayload, serde_json::Error> {
    let mut merged = serde_json::to_value(payload)?;
    merge_top_level(&mut merged, self.to_value()?);
    serde_json::from_value(merged)
  }
}

fn merge_top_level(target: &mut Value, patch: Value) {
  match (target, patch) {
    (Value::Object(target), Value::Object(patch)) => {
      for (key, value) in patch {
        target.insert(key, value);
      }
    }
    (target, patch) => *target = patch,
  }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
  pub id: i64,
  pub buyer_id: Uuid,
  pub checkout_request_id: String,
  pub merchant_request_id: String,
  pub phone: String,
  pub amount: Decimal,
  pub method: PaymentMethod,
  pub status: PaymentStatus,
  pub payload: Json<IntentPayload>,
  pub order_id: Option<Uuid>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
  pub fn failure_reason(&self) -> Option<&str> {
    self.payload.failure.as_ref().map(|f| f.reason.as_str())
  }
}

#[derive(Debug, Clone)]
pub struct NewPaymentIntent {
  pub buyer_id: Uuid,
  pub checkout_request_id: String,
  pub merchant_request_id: String,
  pub phone: String,
  pub amount: Decimal,
  pub payload: IntentPayload,
}

/// What a status transition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
  Applied,
  /// Nothing written; the intent was already in this status.
  Unchanged(PaymentStatus),
}

/// `HC` followed by ten uppercase characters; fits the gateway's 12-character reference.
pub fn generate_order_reference() -> String {
  let raw = Uuid::new_v4().simple().to_string().to_uppercase();
  format!("HC{}", &raw[..10])
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal_macros::dec;
  use serde_json::json;

  fn payload() -> IntentPayload {
    let items = vec![PayloadItem {
      product_id: Uuid::new_v4(),
      variant_id: Uuid::new_v4(),
      product_name: "Silk Wrap".to_string(),
      variant_name: "Emerald".to_string(),
      sku: "SW-EM".to_string(),
      quantity: 2,
      unit_price: dec!(500),
      sale_price: Some(dec!(450)),
    }];
    IntentPayload {
      order_reference: generate_order_reference(),
      amounts: OrderAmounts::from_items(&items, dec!(200)),
      items,
      customer: CustomerInfo {
        name: "Wanjiru".to_string(),
        email: "wanjiru@example.com".to_string(),
        phone: "0712345678".to_string(),
      },
      shipping: ShippingInfo {
        address: "Moi Avenue 12".to_string(),
        city: "Nairobi".to_string(),
        county: None,
        notes: None,
      },
      transaction: None,
      failure: None,
      retried_from: None,
      retried_to: None,
      extra: Map::new(),
    }
  }

  #[test]
  fn amounts_apply_sale_discount_and_shipping() {
    let p = payload();
    assert_eq!(p.amounts.subtotal, dec!(1000));
    assert_eq!(p.amounts.discount, dec!(100));
    assert_eq!(p.amounts.total, dec!(1100));
  }

  #[test]
  fn patch_keeps_cart_and_adds_keys() {
    let original = payload();
    let patch = PayloadPatch::retried_to(42);
    let merged = patch.apply_to(&original).unwrap();
    assert_eq!(merged.items, original.items);
    assert_eq!(merged.retried_to, Some(42));
    assert_eq!(merged.order_reference, original.order_reference);
  }

  #[test]
  fn unknown_payload_keys_survive_a_patch() {
    let mut raw = serde_json::to_value(payload()).unwrap();
    raw["campaign"] = json!("long-rains");
    let stored: IntentPayload = serde_json::from_value(raw).unwrap();

    let patch = PayloadPatch {
      retried_from: Some(7),
      ..PayloadPatch::default()
    };
    let merged = patch.apply_to(&stored).unwrap();
    assert_eq!(merged.extra.get("campaign"), Some(&json!("long-rains")));
    assert_eq!(merged.retried_from, Some(7));
  }

  #[test]
  fn order_reference_fits_gateway_limit() {
    let reference = generate_order_reference();
    assert_eq!(reference.len(), 12);
    assert!(reference.starts_with("HC"));
  }
}
