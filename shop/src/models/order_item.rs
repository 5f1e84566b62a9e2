// shop/src/models/order_item.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
  pub id: Uuid,
  pub order_id: Uuid,
  pub product_id: Uuid,
  pub variant_id: Uuid,
  pub product_name: String,
  pub variant_name: String,
  pub sku: String,
  pub quantity: i32,
  pub unit_price: Decimal,
  pub discount: Decimal,
  pub line_total: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
  pub product_id: Uuid,
  pub variant_id: Uuid,
  pub product_name: String,
  pub variant_name: String,
  pub sku: String,
  pub quantity: i32,
  pub unit_price: Decimal,
  pub discount: Decimal,
}

impl NewOrderItem {
  pub fn line_total(&self) -> Decimal {
    self.unit_price * Decimal::from(self.quantity)
  }
}
