// tests/callback_tests.rs

mod common;

use common::*;
use hera_shop::models::{FailureKind, PaymentStatus};
use hera_shop::pipelines::{handle_callback, initiate_payment, CallbackOutcome, PaymentInitiation};
use hera_shop::services::notifications::NotificationKind;
use serde_json::json;

async fn initiated(app: &TestApp, quantity: i32) -> PaymentInitiation {
  initiate_payment(&app.state, buyer(), checkout_request(quantity)).await.unwrap()
}

#[tokio::test]
async fn duplicate_success_callbacks_create_one_order() {
  let app = test_app();
  let initiation = initiated(&app, 2).await;
  let callback = success_callback(&initiation.checkout_request_id, 1000);

  let (first, _) = handle_callback(&app.state, body(&callback)).await.unwrap();
  let (second, ack) = handle_callback(&app.state, body(&callback)).await.unwrap();

  assert!(matches!(first, CallbackOutcome::Paid { .. }));
  assert_eq!(second, CallbackOutcome::AlreadyResolved(PaymentStatus::Success));
  assert_eq!(ack.result_code, 0);
  assert_eq!(app.store.orders_for_intent(initiation.payment_intent_id).len(), 1);
  assert_eq!(app.stock(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_callbacks_create_one_order() {
  let app = test_app();
  let initiation = initiated(&app, 2).await;
  let callback = success_callback(&initiation.checkout_request_id, 1000);

  let handles: Vec<_> = (0..8)
    .map(|_| {
      let state = app.state.clone();
      let raw = body(&callback);
      tokio::spawn(async move { handle_callback(&state, raw).await })
    })
    .collect();

  let mut paid = 0;
  for handle in handles {
    let (outcome, ack) = handle.await.unwrap().unwrap();
    assert_eq!(ack.result_code, 0);
    match outcome {
      CallbackOutcome::Paid { .. } => paid += 1,
      CallbackOutcome::AlreadyResolved(PaymentStatus::Success) => {}
      other => panic!("unexpected outcome {:?}", other),
    }
  }

  assert_eq!(paid, 1);
  assert_eq!(app.store.order_count(), 1);
  assert_eq!(app.stock(), 3);
}

#[tokio::test]
async fn malformed_and_unknown_callbacks_are_acknowledged() {
  let app = test_app();

  let (outcome, ack) = handle_callback(&app.state, actix_web::web::Bytes::from_static(b"not json"))
    .await
    .unwrap();
  assert_eq!(outcome, CallbackOutcome::Malformed);
  assert_eq!(ack.result_code, 0);

  let (outcome, ack) = handle_callback(&app.state, body(&json!({ "Body": {} }))).await.unwrap();
  assert_eq!(outcome, CallbackOutcome::Malformed);
  assert_eq!(ack.result_code, 0);

  let (outcome, ack) = handle_callback(&app.state, body(&success_callback("ws_CO_unknown", 1000)))
    .await
    .unwrap();
  assert_eq!(outcome, CallbackOutcome::UnknownCheckout);
  assert_eq!(ack.result_code, 0);
  assert_eq!(app.store.order_count(), 0);
}

#[tokio::test]
async fn string_result_codes_are_understood() {
  let app = test_app();
  let initiation = initiated(&app, 1).await;
  let mut callback = failure_callback(&initiation.checkout_request_id, 0, "");
  callback["Body"]["stkCallback"]["ResultCode"] = json!("1037");
  callback["Body"]["stkCallback"]["ResultDesc"] = json!("DS timeout user cannot be reached");

  let (outcome, _) = handle_callback(&app.state, body(&callback)).await.unwrap();

  assert!(matches!(outcome, CallbackOutcome::Failed { requires_refund: false, .. }));
  let intent = app.state.intents.find_by_id(initiation.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(intent.payload.failure.as_ref().unwrap().kind, FailureKind::GatewayFailure);
}

#[tokio::test]
async fn failure_callbacks_never_create_orders() {
  let app = test_app();
  let initiation = initiated(&app, 2).await;
  let callback = failure_callback(&initiation.checkout_request_id, 1, "The balance is insufficient for the transaction.");

  handle_callback(&app.state, body(&callback)).await.unwrap();
  let (again, _) = handle_callback(&app.state, body(&callback)).await.unwrap();

  assert_eq!(again, CallbackOutcome::AlreadyResolved(PaymentStatus::Failed));
  assert_eq!(app.store.order_count(), 0);
  assert_eq!(app.stock(), 5);
}

#[tokio::test]
async fn failure_after_success_keeps_success() {
  let app = test_app();
  let initiation = initiated(&app, 1).await;

  handle_callback(&app.state, body(&success_callback(&initiation.checkout_request_id, 500)))
    .await
    .unwrap();
  let (outcome, _) = handle_callback(
    &app.state,
    body(&failure_callback(&initiation.checkout_request_id, 1032, "Request cancelled by user")),
  )
  .await
  .unwrap();

  assert_eq!(outcome, CallbackOutcome::AlreadyResolved(PaymentStatus::Success));
  let intent = app.state.intents.find_by_id(initiation.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(intent.status, PaymentStatus::Success);
  assert!(intent.payload.failure.is_none());
}

#[tokio::test]
async fn stock_drained_before_success_fails_intent_for_refund() {
  let app = test_app();
  let initiation = initiated(&app, 2).await;
  app.store.set_variant_stock(VARIANT_ID, 1);

  let (outcome, ack) = handle_callback(&app.state, body(&success_callback(&initiation.checkout_request_id, 1000)))
    .await
    .unwrap();

  assert!(matches!(outcome, CallbackOutcome::Failed { requires_refund: true, .. }), "got {:?}", outcome);
  assert_eq!(ack.result_code, 0);

  let intent = app.state.intents.find_by_id(initiation.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(intent.status, PaymentStatus::Failed);
  let failure = intent.payload.failure.clone().unwrap();
  assert_eq!(failure.kind, FailureKind::StockConflict);
  assert!(failure.requires_refund);
  assert!(intent.payload.transaction.is_some(), "the paid receipt is kept for the refund");
  assert_eq!(app.store.order_count(), 0);
  assert_eq!(app.stock(), 1, "no partial decrement");

  assert_eq!(app.notifier.wait_for(NotificationKind::RefundReview, 1).await, 1);
}

#[tokio::test]
async fn late_success_for_failed_intent_requests_refund_review() {
  let app = test_app();
  let initiation = initiated(&app, 1).await;
  handle_callback(
    &app.state,
    body(&failure_callback(&initiation.checkout_request_id, 1037, "DS timeout user cannot be reached")),
  )
  .await
  .unwrap();

  let (outcome, ack) = handle_callback(&app.state, body(&success_callback(&initiation.checkout_request_id, 500)))
    .await
    .unwrap();

  assert_eq!(outcome, CallbackOutcome::AlreadyResolved(PaymentStatus::Failed));
  assert_eq!(ack.result_code, 0);
  assert_eq!(app.store.order_count(), 0);
  assert_eq!(app.notifier.wait_for(NotificationKind::RefundReview, 1).await, 1);
}
