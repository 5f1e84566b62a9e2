// shop/src/models/order.rs

use crate::models::cart_item::ShippingInfo;
use crate::models::order_item::{NewOrderItem, OrderItem};
use crate::models::payment_intent::OrderAmounts;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
  Paid,
  Processing,
  Shipped,
  Delivered,
  Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
  pub id: Uuid,
  pub order_number: String,
  pub buyer_id: Uuid,
  pub payment_intent_id: Option<i64>,
  pub status: OrderStatus,
  pub customer_name: String,
  pub customer_email: String,
  pub customer_phone: String,
  pub shipping: Json<ShippingInfo>,
  pub subtotal: Decimal,
  pub shipping_fee: Decimal,
  pub discount: Decimal,
  pub total_amount: Decimal,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[sqlx(skip)]
  #[serde(default)]
  pub items: Vec<OrderItem>,
}

/// Everything needed to insert an order and its lines in one go.
#[derive(Debug, Clone)]
pub struct NewOrder {
  pub id: Uuid,
  pub order_number: String,
  pub buyer_id: Uuid,
  pub payment_intent_id: Option<i64>,
  pub customer_name: String,
  pub customer_email: String,
  pub customer_phone: String,
  pub shipping: ShippingInfo,
  pub amounts: OrderAmounts,
  pub items: Vec<NewOrderItem>,
}

/// `HC-YYYYMMDD-XXXXXX`, dated in UTC.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
  let suffix = Uuid::new_v4().simple().to_string().to_uppercase();
  format!("HC-{}-{}", now.format("%Y%m%d"), &suffix[..6])
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn order_number_carries_the_date() {
    let now = Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap();
    let number = generate_order_number(now);
    assert!(number.starts_with("HC-20240309-"));
    assert_eq!(number.len(), "HC-20240309-".len() + 6);
  }
}
