// shop/src/store/mod.rs

//! Persistence seams. Each trait is implemented by the Postgres store and by
//! the in-process store used for local runs and tests.

pub mod memory;
pub mod postgres;

use crate::errors::Result;
use crate::models::{
  CatalogProduct, FailureInfo, NewOrder, NewPaymentIntent, Order, PayloadPatch, PaymentIntent, PaymentStatus,
  Product, ProductVariant, TransactionMetadata, TransitionOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait CatalogStore: Send + Sync {
  /// Published products among `product_ids`, each with its variants in creation order.
  async fn find_published_products(&self, product_ids: &[Uuid]) -> Result<Vec<CatalogProduct>>;
}

#[async_trait]
pub trait PaymentIntentStore: Send + Sync {
  /// Inserts a PENDING intent.
  async fn create_intent(&self, new_intent: NewPaymentIntent) -> Result<PaymentIntent>;

  async fn find_by_id(&self, intent_id: i64) -> Result<Option<PaymentIntent>>;

  async fn find_by_checkout_id(&self, checkout_request_id: &str) -> Result<Option<PaymentIntent>>;

  /// PENDING -> SUCCESS, linking `order_id` and recording `metadata`.
  /// Already SUCCESS is `Unchanged`; FAILED is an `InvalidTransition` error.
  async fn transition_to_success(
    &self,
    intent_id: i64,
    order_id: Uuid,
    metadata: TransactionMetadata,
  ) -> Result<TransitionOutcome>;

  /// PENDING -> FAILED. Already FAILED is `Unchanged`; SUCCESS is an `InvalidTransition` error.
  async fn transition_to_failed(
    &self,
    intent_id: i64,
    failure: FailureInfo,
    metadata: Option<TransactionMetadata>,
  ) -> Result<TransitionOutcome>;

  /// Merges `patch` into the stored payload without touching the status.
  async fn annotate(&self, intent_id: i64, patch: PayloadPatch) -> Result<()>;

  /// Records `retriedTo` on the original intent unless a retry is already linked.
  /// Returns `false` when another retry got there first.
  async fn link_retry(&self, original_id: i64, retry_id: i64) -> Result<bool>;

  /// PENDING intents created before `created_before`, oldest first.
  async fn list_stale_pending(&self, created_before: DateTime<Utc>, limit: i64) -> Result<Vec<PaymentIntent>>;
}

/// Links an order to the intent that paid for it.
#[derive(Debug, Clone)]
pub struct Settlement {
  pub intent_id: i64,
  pub metadata: TransactionMetadata,
}

#[derive(Debug, Clone)]
pub enum OrderOutcome {
  Created(Order),
  /// The intent was no longer PENDING; nothing was written.
  AlreadySettled(PaymentStatus),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
  /// Inserts the order, decrements stock and, with a settlement, moves the
  /// intent to SUCCESS. All of it happens or none of it does.
  async fn create_order(&self, order: NewOrder, settlement: Option<Settlement>) -> Result<OrderOutcome>;

  async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>>;
}

/// Demo catalog loaded when `SEED_DB=true`.
pub fn demo_catalog(now: DateTime<Utc>) -> Vec<CatalogProduct> {
  let wrap = Product {
    id: Uuid::from_u128(0x1e5a_0001),
    name: "Kitenge Wrap Dress".to_string(),
    published: true,
    created_at: now,
    updated_at: now,
  };
  let bag = Product {
    id: Uuid::from_u128(0x1e5a_0002),
    name: "Maasai Beaded Tote".to_string(),
    published: true,
    created_at: now,
    updated_at: now,
  };
  vec![
    CatalogProduct {
      variants: vec![
        ProductVariant {
          id: Uuid::from_u128(0x1e5a_0101),
          product_id: wrap.id,
          sku: "KWD-S".to_string(),
          name: "Small".to_string(),
          price: Decimal::from(3500),
          sale_price: Some(Decimal::from(2990)),
          stock: 12,
        },
        ProductVariant {
          id: Uuid::from_u128(0x1e5a_0102),
          product_id: wrap.id,
          sku: "KWD-M".to_string(),
          name: "Medium".to_string(),
          price: Decimal::from(3500),
          sale_price: None,
          stock: 8,
        },
      ],
      product: wrap,
    },
    CatalogProduct {
      variants: vec![ProductVariant {
        id: Uuid::from_u128(0x1e5a_0201),
        product_id: bag.id,
        sku: "MBT-1".to_string(),
        name: "Standard".to_string(),
        price: Decimal::from(1800),
        sale_price: None,
        stock: 5,
      }],
      product: bag,
    },
  ]
}
