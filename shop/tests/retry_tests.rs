// tests/retry_tests.rs

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::*;
use hera_shop::errors::{AppError, Result as AppResult};
use hera_shop::models::{
  FailureInfo, FailureKind, NewPaymentIntent, PayloadPatch, PaymentIntent, PaymentStatus, TransactionMetadata,
  TransitionOutcome,
};
use hera_shop::pipelines::{handle_callback, initiate_payment, retry_payment, PaymentInitiation};
use hera_shop::store::{MemoryStore, PaymentIntentStore};
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

async fn failed_payment(app: &TestApp) -> PaymentInitiation {
  let initiation = initiate_payment(&app.state, buyer(), checkout_request(2)).await.unwrap();
  handle_callback(
    &app.state,
    body(&failure_callback(&initiation.checkout_request_id, 1032, "Request cancelled by user")),
  )
  .await
  .unwrap();
  initiation
}

#[tokio::test]
async fn retry_creates_linked_pending_intent() {
  let app = test_app();
  let original = failed_payment(&app).await;

  let retried = retry_payment(&app.state, buyer(), original.payment_intent_id, None).await.unwrap();

  assert_ne!(retried.checkout_request_id, original.checkout_request_id);
  assert_ne!(retried.payment_intent_id, original.payment_intent_id);
  assert_ne!(retried.order_reference, original.order_reference);
  assert_eq!(retried.amount, dec!(1000));
  assert_eq!(app.gateway.push_count(), 2);

  let old = app.state.intents.find_by_id(original.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(old.status, PaymentStatus::Failed);
  assert_eq!(old.payload.retried_to, Some(retried.payment_intent_id));
  assert!(old.payload.failure.is_some(), "annotation keeps the failure record");

  let new = app.state.intents.find_by_id(retried.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(new.status, PaymentStatus::Pending);
  assert_eq!(new.payload.retried_from, Some(original.payment_intent_id));
  assert!(new.payload.failure.is_none());
  assert!(new.payload.transaction.is_none());
  assert_eq!(new.payload.items, old.payload.items);
}

#[tokio::test]
async fn retried_payment_can_complete() {
  let app = test_app();
  let original = failed_payment(&app).await;
  let retried = retry_payment(&app.state, buyer(), original.payment_intent_id, None).await.unwrap();

  handle_callback(&app.state, body(&success_callback(&retried.checkout_request_id, 1000)))
    .await
    .unwrap();

  let new = app.state.intents.find_by_id(retried.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(new.status, PaymentStatus::Success);
  assert_eq!(app.stock(), 3);
}

#[tokio::test]
async fn retry_accepts_a_different_phone() {
  let app = test_app();
  let original = failed_payment(&app).await;

  let retried = retry_payment(&app.state, buyer(), original.payment_intent_id, Some("0722000111".to_string()))
    .await
    .unwrap();

  let new = app.state.intents.find_by_id(retried.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(new.phone, "254722000111");
  assert_eq!(app.gateway.pushes().last().unwrap().phone, "254722000111");
}

#[tokio::test]
async fn only_failed_intents_can_be_retried() {
  let app = test_app();

  let pending = initiate_payment(&app.state, buyer(), checkout_request(1)).await.unwrap();
  let err = retry_payment(&app.state, buyer(), pending.payment_intent_id, None).await.unwrap_err();
  assert!(matches!(err, AppError::Validation(_)), "got {:?}", err);

  handle_callback(&app.state, body(&success_callback(&pending.checkout_request_id, 500)))
    .await
    .unwrap();
  let err = retry_payment(&app.state, buyer(), pending.payment_intent_id, None).await.unwrap_err();
  assert!(matches!(err, AppError::Validation(_)), "got {:?}", err);
  assert_eq!(app.gateway.push_count(), 1);
}

#[tokio::test]
async fn retry_checks_ownership_and_existence() {
  let app = test_app();
  let original = failed_payment(&app).await;

  let err = retry_payment(&app.state, other_buyer(), original.payment_intent_id, None).await.unwrap_err();
  assert!(matches!(err, AppError::Forbidden(_)), "got {:?}", err);

  let err = retry_payment(&app.state, buyer(), 9_999, None).await.unwrap_err();
  assert!(matches!(err, AppError::NotFound(_)), "got {:?}", err);

  let retried = retry_payment(&app.state, admin(), original.payment_intent_id, None).await.unwrap();
  let new = app.state.intents.find_by_id(retried.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(new.buyer_id, BUYER_ID, "an admin retry still belongs to the buyer");
}

#[tokio::test]
async fn retry_revalidates_stock() {
  let app = test_app();
  let original = failed_payment(&app).await;
  app.store.set_variant_stock(VARIANT_ID, 1);

  let err = retry_payment(&app.state, buyer(), original.payment_intent_id, None).await.unwrap_err();

  assert!(matches!(err, AppError::InsufficientStock(_)), "got {:?}", err);
  assert_eq!(app.gateway.push_count(), 1);
  let old = app.state.intents.find_by_id(original.payment_intent_id).await.unwrap().unwrap();
  assert!(old.payload.retried_to.is_none());
}

#[tokio::test]
async fn a_failed_intent_is_retried_at_most_once() {
  let app = test_app();
  let original = failed_payment(&app).await;
  let first = retry_payment(&app.state, buyer(), original.payment_intent_id, None).await.unwrap();

  let err = retry_payment(&app.state, buyer(), original.payment_intent_id, None).await.unwrap_err();

  assert!(matches!(err, AppError::Validation(_)), "got {:?}", err);
  assert_eq!(app.gateway.push_count(), 2);
  let old = app.state.intents.find_by_id(original.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(old.payload.retried_to, Some(first.payment_intent_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retries_yield_a_single_order() {
  let app = test_app();
  let original = failed_payment(&app).await;

  let mut handles = Vec::new();
  for _ in 0..2 {
    let state = app.state.clone();
    let id = original.payment_intent_id;
    handles.push(tokio::spawn(async move { retry_payment(&state, buyer(), id, None).await }));
  }
  let mut winners = Vec::new();
  for handle in handles {
    match handle.await.unwrap() {
      Ok(retried) => winners.push(retried),
      Err(err) => assert!(matches!(err, AppError::Validation(_)), "got {:?}", err),
    }
  }
  assert_eq!(winners.len(), 1);
  let old = app.state.intents.find_by_id(original.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(old.payload.retried_to, Some(winners[0].payment_intent_id));

  // The buyer pays every prompt that reached their phone.
  for push in app.gateway.issued() {
    if push.checkout_request_id != original.checkout_request_id {
      handle_callback(&app.state, body(&success_callback(&push.checkout_request_id, 1000)))
        .await
        .unwrap();
    }
  }
  assert_eq!(app.store.order_count(), 1);
  assert_eq!(app.stock(), 3);
}

#[tokio::test]
async fn link_retry_only_sets_the_first_link() {
  let app = test_app();
  let original = failed_payment(&app).await;

  assert!(app.state.intents.link_retry(original.payment_intent_id, 41).await.unwrap());
  assert!(!app.state.intents.link_retry(original.payment_intent_id, 42).await.unwrap());

  let old = app.state.intents.find_by_id(original.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(old.payload.retried_to, Some(41));
  assert_eq!(old.status, PaymentStatus::Failed);
  let err = app.state.intents.link_retry(9_999, 43).await.unwrap_err();
  assert!(matches!(err, AppError::NotFound(_)), "got {:?}", err);
}

#[tokio::test]
async fn annotate_merges_without_touching_status() {
  let app = test_app();
  let original = failed_payment(&app).await;
  let patch = PayloadPatch {
    retried_from: Some(77),
    ..PayloadPatch::default()
  };

  app.state.intents.annotate(original.payment_intent_id, patch).await.unwrap();

  let old = app.state.intents.find_by_id(original.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(old.status, PaymentStatus::Failed);
  assert_eq!(old.payload.retried_from, Some(77));
  assert_eq!(old.payload.failure.as_ref().map(|f| f.kind), Some(FailureKind::Cancelled));
}

/// Intent store whose retry links always fail.
struct UnlinkableIntents(Arc<MemoryStore>);

#[async_trait]
impl PaymentIntentStore for UnlinkableIntents {
  async fn create_intent(&self, new_intent: NewPaymentIntent) -> AppResult<PaymentIntent> {
    self.0.create_intent(new_intent).await
  }

  async fn find_by_id(&self, intent_id: i64) -> AppResult<Option<PaymentIntent>> {
    self.0.find_by_id(intent_id).await
  }

  async fn find_by_checkout_id(&self, checkout_request_id: &str) -> AppResult<Option<PaymentIntent>> {
    self.0.find_by_checkout_id(checkout_request_id).await
  }

  async fn transition_to_success(
    &self,
    intent_id: i64,
    order_id: Uuid,
    metadata: TransactionMetadata,
  ) -> AppResult<TransitionOutcome> {
    self.0.transition_to_success(intent_id, order_id, metadata).await
  }

  async fn transition_to_failed(
    &self,
    intent_id: i64,
    failure: FailureInfo,
    metadata: Option<TransactionMetadata>,
  ) -> AppResult<TransitionOutcome> {
    self.0.transition_to_failed(intent_id, failure, metadata).await
  }

  async fn annotate(&self, intent_id: i64, patch: PayloadPatch) -> AppResult<()> {
    self.0.annotate(intent_id, patch).await
  }

  async fn link_retry(&self, _original_id: i64, _retry_id: i64) -> AppResult<bool> {
    Err(AppError::Internal("intent store unavailable".to_string()))
  }

  async fn list_stale_pending(&self, created_before: DateTime<Utc>, limit: i64) -> AppResult<Vec<PaymentIntent>> {
    self.0.list_stale_pending(created_before, limit).await
  }
}

#[tokio::test]
async fn a_failed_link_still_returns_the_issued_retry() {
  let app = test_app();
  let original = failed_payment(&app).await;
  let mut state = app.state.clone();
  state.intents = Arc::new(UnlinkableIntents(app.store.clone()));

  let retried = retry_payment(&state, buyer(), original.payment_intent_id, None).await.unwrap();

  assert_eq!(app.gateway.push_count(), 2);
  let new = app.state.intents.find_by_id(retried.payment_intent_id).await.unwrap().unwrap();
  assert_eq!(new.status, PaymentStatus::Pending);
  assert_eq!(new.payload.retried_from, Some(original.payment_intent_id));
}
