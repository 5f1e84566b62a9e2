// tests/status_tests.rs

mod common;

use chrono::Duration;
use common::*;
use hera_shop::errors::AppError;
use hera_shop::models::PaymentStatus;
use hera_shop::pipelines::{handle_callback, initiate_payment};
use hera_shop::services::status::payment_status;
use rust_decimal_macros::dec;

#[tokio::test]
async fn fresh_pending_intent_suggests_polling_again() {
  let app = test_app();
  let initiation = initiate_payment(&app.state, buyer(), checkout_request(2)).await.unwrap();

  let view = payment_status(&app.state, &initiation.checkout_request_id, &buyer()).await.unwrap();

  assert_eq!(view.status, PaymentStatus::Pending);
  assert_eq!(view.amount, dec!(1000));
  assert_eq!(view.phone, BUYER_PHONE);
  assert_eq!(view.expired, Some(false));
  assert_eq!(view.retry_after, Some(30));
  assert!(view.order.is_none());
}

#[tokio::test]
async fn old_pending_intent_is_reported_expired_but_not_changed() {
  let app = test_app();
  let initiation = initiate_payment(&app.state, buyer(), checkout_request(2)).await.unwrap();
  app.clock.advance(Duration::minutes(6));

  let view = payment_status(&app.state, &initiation.checkout_request_id, &buyer()).await.unwrap();

  assert_eq!(view.status, PaymentStatus::Pending);
  assert_eq!(view.expired, Some(true));
  assert_eq!(view.retry_after, None);
  let stored = app.state.intents.find_by_id(initiation.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn settled_intents_report_order_or_reason() {
  let app = test_app();
  let paid = initiate_payment(&app.state, buyer(), checkout_request(1)).await.unwrap();
  let cancelled = initiate_payment(&app.state, buyer(), checkout_request(1)).await.unwrap();
  handle_callback(&app.state, body(&success_callback(&paid.checkout_request_id, 500)))
    .await
    .unwrap();
  handle_callback(
    &app.state,
    body(&failure_callback(&cancelled.checkout_request_id, 1032, "Request cancelled by user")),
  )
  .await
  .unwrap();

  let view = payment_status(&app.state, &paid.checkout_request_id, &buyer()).await.unwrap();
  assert_eq!(view.status, PaymentStatus::Success);
  assert_eq!(view.order.as_ref().map(|o| o.total_amount), Some(dec!(500)));
  assert_eq!(view.expired, None);

  let view = payment_status(&app.state, &cancelled.checkout_request_id, &buyer()).await.unwrap();
  assert_eq!(view.status, PaymentStatus::Failed);
  assert_eq!(view.failure_reason.as_deref(), Some("Request cancelled by user"));
  assert!(view.order.is_none());
}

#[tokio::test]
async fn status_is_limited_to_owner_and_admin() {
  let app = test_app();
  let initiation = initiate_payment(&app.state, buyer(), checkout_request(1)).await.unwrap();

  let err = payment_status(&app.state, &initiation.checkout_request_id, &other_buyer())
    .await
    .unwrap_err();
  assert!(matches!(err, AppError::Forbidden(_)), "got {:?}", err);

  let view = payment_status(&app.state, &initiation.checkout_request_id, &admin()).await.unwrap();
  assert_eq!(view.payment_intent_id, initiation.payment_intent_id);

  let err = payment_status(&app.state, "ws_CO_missing", &buyer()).await.unwrap_err();
  assert!(matches!(err, AppError::NotFound(_)), "got {:?}", err);
}
