// shop/src/services/stock.rs

use crate::errors::{AppError, Result};
use crate::models::{CartLine, CatalogProduct, IntentPayload, OrderAmounts, PayloadItem, Product, ProductVariant};
use crate::store::CatalogStore;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Largest quantity a single cart line may ask for.
pub const MAX_LINE_QUANTITY: i32 = 1_000;

/// A cart line matched to its catalog rows.
#[derive(Debug, Clone)]
pub struct ResolvedLine {
  pub product: Product,
  pub variant: ProductVariant,
  pub quantity: i32,
}

impl ResolvedLine {
  pub fn to_payload_item(&self) -> PayloadItem {
    PayloadItem {
      product_id: self.product.id,
      variant_id: self.variant.id,
      product_name: self.product.name.clone(),
      variant_name: self.variant.name.clone(),
      sku: self.variant.sku.clone(),
      quantity: self.quantity,
      unit_price: self.variant.price,
      sale_price: self.variant.effective_sale_price(),
    }
  }
}

/// Resolves every line against the published catalog and checks stock.
///
/// Read-only. Lines naming the same variant are checked against its stock together.
#[instrument(name = "stock::resolve_lines", skip(catalog, lines), fields(lines = lines.len()))]
pub async fn resolve_lines(catalog: &dyn CatalogStore, lines: &[CartLine]) -> Result<Vec<ResolvedLine>> {
  if lines.is_empty() {
    return Err(AppError::Validation("Cart is empty".to_string()));
  }
  if let Some(line) = lines.iter().find(|l| l.quantity <= 0) {
    return Err(AppError::Validation(format!(
      "Quantity for product {} must be at least 1",
      line.product_id
    )));
  }
  if let Some(line) = lines.iter().find(|l| l.quantity > MAX_LINE_QUANTITY) {
    return Err(AppError::Validation(format!(
      "Quantity for product {} must be at most {}",
      line.product_id, MAX_LINE_QUANTITY
    )));
  }

  let mut product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
  product_ids.sort();
  product_ids.dedup();
  let catalog_rows = catalog.find_published_products(&product_ids).await?;
  let by_id: HashMap<Uuid, &CatalogProduct> = catalog_rows.iter().map(|c| (c.product.id, c)).collect();

  let mut resolved = Vec::with_capacity(lines.len());
  let mut requested: HashMap<Uuid, i32> = HashMap::new();
  for line in lines {
    let entry = by_id
      .get(&line.product_id)
      .ok_or_else(|| AppError::InvalidProduct(format!("Product {} is not available", line.product_id)))?;
    let variant = entry.variant(line.variant_id).ok_or_else(|| match line.variant_id {
      Some(id) => AppError::VariantNotFound(format!("Variant {} of {}", id, entry.product.name)),
      None => AppError::VariantNotFound(format!("{} has no purchasable variant", entry.product.name)),
    })?;

    let total = requested.entry(variant.id).or_default();
    *total = add_quantity(*total, line.quantity)?;
    if variant.stock < *total {
      return Err(AppError::InsufficientStock(format!(
        "{} ({}): {} available, {} requested",
        entry.product.name, variant.name, variant.stock, total
      )));
    }

    resolved.push(ResolvedLine {
      product: entry.product.clone(),
      variant: variant.clone(),
      quantity: line.quantity,
    });
  }

  debug!(resolved = resolved.len(), "Cart lines resolved against catalog.");
  Ok(resolved)
}

/// Adds a line's quantity to a per-variant total, refusing totals that do not fit.
pub fn add_quantity(total: i32, quantity: i32) -> Result<i32> {
  total
    .checked_add(quantity)
    .filter(|sum| *sum >= 0)
    .ok_or_else(|| AppError::Validation(format!("Requested quantity {} + {} is too large", total, quantity)))
}

/// Checks the lines without returning the matched rows.
pub async fn validate_stock(catalog: &dyn CatalogStore, lines: &[CartLine]) -> Result<()> {
  resolve_lines(catalog, lines).await.map(|_| ())
}

/// Price snapshots and totals for resolved lines.
pub fn price_lines(resolved: &[ResolvedLine], shipping_fee: Decimal) -> (Vec<PayloadItem>, OrderAmounts) {
  let items: Vec<PayloadItem> = resolved.iter().map(ResolvedLine::to_payload_item).collect();
  let amounts = OrderAmounts::from_items(&items, shipping_fee);
  (items, amounts)
}

/// Cart lines recorded in a stored payload, for re-validation.
pub fn lines_from_payload(payload: &IntentPayload) -> Vec<CartLine> {
  payload
    .items
    .iter()
    .map(|item| CartLine {
      product_id: item.product_id,
      variant_id: Some(item.variant_id),
      quantity: item.quantity,
    })
    .collect()
}
