// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hera_shop::config::AppConfig;
use hera_shop::errors::Result as AppResult;
use hera_shop::models::{
  AuthenticatedUser, CartLine, CheckoutRequest, CustomerInfo, Product, ProductVariant, ShippingInfo,
};
use hera_shop::services::clock::{Clock, ManualClock};
use hera_shop::services::gateway::mock::MockGateway;
use hera_shop::services::notifications::{Notification, NotificationKind, Notifier, SentNotification};
use hera_shop::state::AppState;
use hera_shop::store::MemoryStore;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use uuid::Uuid;

pub const PRODUCT_ID: Uuid = Uuid::from_u128(0x6a1e_0000_0000_4000_8000_0000_0000_0001);
pub const VARIANT_ID: Uuid = Uuid::from_u128(0x6a1e_0000_0000_4000_8000_0000_0000_0101);
pub const BUYER_ID: Uuid = Uuid::from_u128(0xb0b0_0000_0000_4000_8000_0000_0000_0001);
pub const OTHER_BUYER_ID: Uuid = Uuid::from_u128(0xb0b0_0000_0000_4000_8000_0000_0000_0002);
pub const ADMIN_ID: Uuid = Uuid::from_u128(0xad00_0000_0000_4000_8000_0000_0000_0001);
pub const BUYER_PHONE: &str = "254712345678";

static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

/// Keeps every notification instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
  sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn sent(&self) -> Vec<Notification> {
    self.sent.lock().clone()
  }

  pub fn count_of(&self, kind: NotificationKind) -> usize {
    self.sent.lock().iter().filter(|n| n.kind == kind).count()
  }

  /// Notifications go out on spawned tasks; wait until `expected` of `kind` arrived.
  pub async fn wait_for(&self, kind: NotificationKind, expected: usize) -> usize {
    for _ in 0..50 {
      if self.count_of(kind) >= expected {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    self.count_of(kind)
  }
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn send(&self, notification: &Notification) -> AppResult<SentNotification> {
    self.sent.lock().push(notification.clone());
    Ok(SentNotification {
      to: notification.to.clone(),
      message_id: format!("test_{}", self.sent.lock().len()),
    })
  }
}

pub struct TestApp {
  pub state: AppState,
  pub store: Arc<MemoryStore>,
  pub gateway: Arc<MockGateway>,
  pub notifier: Arc<RecordingNotifier>,
  pub clock: Arc<ManualClock>,
}

impl TestApp {
  pub fn stock(&self) -> i32 {
    self.store.variant_stock(VARIANT_ID).unwrap_or(-1)
  }
}

/// One published product with a single variant: price 500, stock 5.
pub fn test_app() -> TestApp {
  test_app_with(AppConfig::default())
}

pub fn test_app_with(config: AppConfig) -> TestApp {
  setup_tracing();
  let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().unwrap();
  let clock = Arc::new(ManualClock::new(start));
  let store = Arc::new(MemoryStore::new(clock.clone()));
  store.insert_product(
    Product {
      id: PRODUCT_ID,
      name: "Ankara Wrap Dress".to_string(),
      published: true,
      created_at: start,
      updated_at: start,
    },
    vec![ProductVariant {
      id: VARIANT_ID,
      product_id: PRODUCT_ID,
      sku: "HC-ANK-M".to_string(),
      name: "Medium".to_string(),
      price: dec!(500),
      sale_price: None,
      stock: 5,
    }],
  );
  let gateway = Arc::new(MockGateway::default());
  let notifier = Arc::new(RecordingNotifier::default());
  let clock_dyn: Arc<dyn Clock> = clock.clone();
  let state = AppState::new(
    Arc::new(config),
    store.clone(),
    gateway.clone(),
    notifier.clone(),
    clock_dyn,
  );
  TestApp {
    state,
    store,
    gateway,
    notifier,
    clock,
  }
}

pub fn buyer() -> AuthenticatedUser {
  AuthenticatedUser::customer(BUYER_ID)
}

pub fn other_buyer() -> AuthenticatedUser {
  AuthenticatedUser::customer(OTHER_BUYER_ID)
}

pub fn admin() -> AuthenticatedUser {
  AuthenticatedUser {
    user_id: ADMIN_ID,
    role: hera_shop::models::UserRole::Admin,
  }
}

pub fn checkout_request(quantity: i32) -> CheckoutRequest {
  CheckoutRequest {
    items: vec![CartLine {
      product_id: PRODUCT_ID,
      variant_id: Some(VARIANT_ID),
      quantity,
    }],
    customer: CustomerInfo {
      name: "Wanjiku Kamau".to_string(),
      email: "wanjiku@example.com".to_string(),
      phone: "0712345678".to_string(),
    },
    shipping: ShippingInfo {
      address: "Moi Avenue 12".to_string(),
      city: "Nairobi".to_string(),
      county: Some("Nairobi".to_string()),
      notes: None,
    },
    phone: Some(BUYER_PHONE.to_string()),
  }
}

pub fn checkout_json(quantity: i32) -> Value {
  json!({
    "items": [{ "productId": PRODUCT_ID, "variantId": VARIANT_ID, "quantity": quantity }],
    "customer": { "name": "Wanjiku Kamau", "email": "wanjiku@example.com", "phone": "0712345678" },
    "shipping": { "address": "Moi Avenue 12", "city": "Nairobi" },
    "phone": BUYER_PHONE
  })
}

/// The gateway sends whole-shilling amounts as JSON numbers.
pub fn success_callback(checkout_request_id: &str, amount: u64) -> Value {
  json!({
    "Body": {
      "stkCallback": {
        "MerchantRequestID": "29115-34620561-1",
        "CheckoutRequestID": checkout_request_id,
        "ResultCode": 0,
        "ResultDesc": "The service request is processed successfully.",
        "CallbackMetadata": {
          "Item": [
            { "Name": "Amount", "Value": amount },
            { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
            { "Name": "TransactionDate", "Value": 20240501091500u64 },
            { "Name": "PhoneNumber", "Value": 254712345678u64 }
          ]
        }
      }
    }
  })
}

pub fn failure_callback(checkout_request_id: &str, code: i64, desc: &str) -> Value {
  json!({
    "Body": {
      "stkCallback": {
        "MerchantRequestID": "29115-34620561-1",
        "CheckoutRequestID": checkout_request_id,
        "ResultCode": code,
        "ResultDesc": desc
      }
    }
  })
}

pub fn body(value: &Value) -> actix_web::web::Bytes {
  actix_web::web::Bytes::from(serde_json::to_vec(value).unwrap())
}
