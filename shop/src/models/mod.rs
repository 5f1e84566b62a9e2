// shop/src/models/mod.rs

//! Catalog, order and payment intent records plus the request shapes that feed them.

pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment_intent;
pub mod product;
pub mod user;

pub use cart_item::{CartLine, CheckoutRequest, CustomerInfo, ShippingInfo};
pub use order::{NewOrder, Order, OrderStatus};
pub use order_item::{NewOrderItem, OrderItem};
pub use payment_intent::{
  FailureInfo, FailureKind, IntentPayload, NewPaymentIntent, OrderAmounts, PayloadItem, PayloadPatch, PaymentIntent,
  PaymentMethod, PaymentStatus, TransactionMetadata, TransitionOutcome,
};
pub use product::{CatalogProduct, Product, ProductVariant};
pub use user::{AuthenticatedUser, UserRole};
