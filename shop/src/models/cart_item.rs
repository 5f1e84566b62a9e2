// shop/src/models/cart_item.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One cart line as submitted by the storefront.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
  pub product_id: Uuid,
  #[serde(default)]
  pub variant_id: Option<Uuid>,
  pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerInfo {
  pub name: String,
  pub email: String,
  pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingInfo {
  pub address: String,
  pub city: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub county: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

/// Body of `POST /payments/mpesa`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
  pub items: Vec<CartLine>,
  pub customer: CustomerInfo,
  pub shipping: ShippingInfo,
  /// Number to push to; defaults to the customer's phone.
  #[serde(default)]
  pub phone: Option<String>,
}
