// shop/src/services/notifications.rs

use crate::errors::{AppError, Result as AppResult};
use crate::models::{Order, PaymentIntent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
  PaymentSucceeded,
  PaymentFailed,
  /// Money may have been taken without an order; a person has to look.
  RefundReview,
}

#[derive(Debug, Clone)]
pub struct Notification {
  pub kind: NotificationKind,
  pub to: String,
  pub subject: String,
  pub body: String,
  pub checkout_request_id: String,
}

#[derive(Debug)]
pub struct SentNotification {
  pub to: String,
  pub message_id: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
  async fn send(&self, notification: &Notification) -> AppResult<SentNotification>;
}

/// Writes notifications to the log instead of a mail provider.
pub struct LogNotifier {
  sender: String,
}

impl LogNotifier {
  pub fn new(sender: impl Into<String>) -> Self {
    Self { sender: sender.into() }
  }
}

#[async_trait]
impl Notifier for LogNotifier {
  async fn send(&self, notification: &Notification) -> AppResult<SentNotification> {
    if notification.to.trim().is_empty() {
      return Err(AppError::Validation("Notification has no recipient".to_string()));
    }
    let message_id = format!("log_{}", uuid::Uuid::new_v4());
    info!(
      from = %self.sender,
      to = %notification.to,
      kind = ?notification.kind,
      subject = %notification.subject,
      %message_id,
      "Notification delivered to log."
    );
    Ok(SentNotification {
      to: notification.to.clone(),
      message_id,
    })
  }
}

pub fn payment_succeeded(intent: &PaymentIntent, order: &Order) -> Notification {
  Notification {
    kind: NotificationKind::PaymentSucceeded,
    to: intent.payload.customer.email.clone(),
    subject: format!("Order {} confirmed", order.order_number),
    body: format!(
      "We received KES {} for order {}. Thank you for shopping with Hera Collection.",
      order.total_amount, order.order_number
    ),
    checkout_request_id: intent.checkout_request_id.clone(),
  }
}

pub fn payment_failed(intent: &PaymentIntent, reason: &str) -> Notification {
  Notification {
    kind: NotificationKind::PaymentFailed,
    to: intent.payload.customer.email.clone(),
    subject: format!("Payment for {} was not completed", intent.payload.order_reference),
    body: format!("Your M-Pesa payment of KES {} did not go through: {}", intent.amount, reason),
    checkout_request_id: intent.checkout_request_id.clone(),
  }
}

pub fn refund_review(intent: &PaymentIntent, admin_email: &str, reason: &str) -> Notification {
  Notification {
    kind: NotificationKind::RefundReview,
    to: admin_email.to_string(),
    subject: format!("Refund review: payment intent {}", intent.id),
    body: format!(
      "Checkout {} (KES {}, phone {}) needs manual review: {}",
      intent.checkout_request_id, intent.amount, intent.phone, reason
    ),
    checkout_request_id: intent.checkout_request_id.clone(),
  }
}

/// Sends on a background task. Failures are logged and go no further.
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification) -> tokio::task::JoinHandle<()> {
  let span = tracing::info_span!(
    "notification",
    kind = ?notification.kind,
    checkout_request_id = %notification.checkout_request_id
  );
  tokio::spawn(
    async move {
      if let Err(e) = notifier.send(&notification).await {
        error!(error = %e, to = %notification.to, "Notification could not be sent.");
      }
    }
    .instrument(span),
  )
}
