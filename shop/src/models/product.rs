// shop/src/models/product.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Product {
  pub id: Uuid,
  pub name: String,
  pub published: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProductVariant {
  pub id: Uuid,
  pub product_id: Uuid,
  pub sku: String,
  pub name: String,
  pub price: Decimal,
  pub sale_price: Option<Decimal>,
  pub stock: i32,
}

impl ProductVariant {
  /// Sale price when it actually undercuts the list price.
  pub fn effective_sale_price(&self) -> Option<Decimal> {
    self.sale_price.filter(|sale| *sale < self.price && !sale.is_sign_negative())
  }
}

/// A published product together with its variants, in creation order.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogProduct {
  pub product: Product,
  pub variants: Vec<ProductVariant>,
}

impl CatalogProduct {
  /// Resolves the requested variant, falling back to the first one.
  pub fn variant(&self, variant_id: Option<Uuid>) -> Option<&ProductVariant> {
    match variant_id {
      Some(id) => self.variants.iter().find(|v| v.id == id),
      None => self.variants.first(),
    }
  }
}
