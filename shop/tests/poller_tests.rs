// tests/poller_tests.rs

mod common;

use async_trait::async_trait;
use common::*;
use hera_shop::errors::{AppError, Result as AppResult};
use hera_shop::models::PaymentStatus;
use hera_shop::pipelines::{handle_callback, initiate_payment};
use hera_shop::services::poller::{
  poll_until_resolved, HttpStatusSource, LocalStatusSource, PollOutcome, PollSettings, StatusSource,
};
use hera_shop::services::status::PaymentStatusView;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::VecDeque;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn view(status: PaymentStatus) -> PaymentStatusView {
  PaymentStatusView {
    payment_intent_id: 1,
    checkout_request_id: "ws_CO_poll".to_string(),
    status,
    amount: dec!(1000),
    phone: BUYER_PHONE.to_string(),
    order: None,
    failure_reason: None,
    expired: None,
    retry_after: None,
  }
}

/// Replays scripted answers; once exhausted it keeps answering PENDING.
struct ScriptedSource {
  answers: Mutex<VecDeque<AppResult<PaymentStatusView>>>,
  calls: Mutex<u32>,
}

impl ScriptedSource {
  fn new(answers: Vec<AppResult<PaymentStatusView>>) -> Self {
    Self {
      answers: Mutex::new(answers.into()),
      calls: Mutex::new(0),
    }
  }

  fn calls(&self) -> u32 {
    *self.calls.lock()
  }
}

#[async_trait]
impl StatusSource for ScriptedSource {
  async fn fetch_status(&self, _checkout_request_id: &str) -> AppResult<PaymentStatusView> {
    *self.calls.lock() += 1;
    self
      .answers
      .lock()
      .pop_front()
      .unwrap_or_else(|| Ok(view(PaymentStatus::Pending)))
  }
}

fn settings(max_attempts: u32) -> PollSettings {
  PollSettings {
    interval: Duration::from_secs(30),
    max_attempts,
  }
}

#[tokio::test(start_paused = true)]
async fn polls_until_success() {
  setup_tracing();
  let source = ScriptedSource::new(vec![
    Ok(view(PaymentStatus::Pending)),
    Ok(view(PaymentStatus::Pending)),
    Ok(view(PaymentStatus::Success)),
  ]);
  let started = tokio::time::Instant::now();

  let outcome = poll_until_resolved(&source, "ws_CO_poll", settings(20)).await.unwrap();

  assert!(matches!(outcome, PollOutcome::Succeeded(ref v) if v.status == PaymentStatus::Success));
  assert_eq!(source.calls(), 3);
  let waited = started.elapsed();
  assert!(waited >= Duration::from_secs(60) && waited < Duration::from_secs(61), "waited {:?}", waited);
}

#[tokio::test(start_paused = true)]
async fn stops_on_failure() {
  let source = ScriptedSource::new(vec![Ok(view(PaymentStatus::Pending)), Ok(view(PaymentStatus::Failed))]);

  let outcome = poll_until_resolved(&source, "ws_CO_poll", settings(20)).await.unwrap();

  assert!(matches!(outcome, PollOutcome::Failed(_)));
  assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
  let source = ScriptedSource::new(vec![]);
  let started = tokio::time::Instant::now();

  let outcome = poll_until_resolved(&source, "ws_CO_poll", settings(20)).await.unwrap();

  match outcome {
    PollOutcome::TimedOut { attempts, last_seen } => {
      assert_eq!(attempts, 20);
      assert_eq!(last_seen.map(|v| v.status), Some(PaymentStatus::Pending));
    }
    other => panic!("expected a timeout, got {:?}", other),
  }
  assert_eq!(source.calls(), 20);
  assert!(started.elapsed() >= Duration::from_secs(19 * 30));
  assert!(started.elapsed() < Duration::from_secs(20 * 30), "no sleep after the last attempt");
}

#[tokio::test(start_paused = true)]
async fn transient_errors_count_as_attempts_and_not_found_stops() {
  let source = ScriptedSource::new(vec![
    Err(AppError::Internal("connection reset".to_string())),
    Ok(view(PaymentStatus::Success)),
  ]);
  let outcome = poll_until_resolved(&source, "ws_CO_poll", settings(3)).await.unwrap();
  assert!(matches!(outcome, PollOutcome::Succeeded(_)));
  assert_eq!(source.calls(), 2);

  let source = ScriptedSource::new(vec![Err(AppError::NotFound("no such checkout".to_string()))]);
  let err = poll_until_resolved(&source, "ws_CO_poll", settings(3)).await.unwrap_err();
  assert!(matches!(err, AppError::NotFound(_)));
  assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn local_source_reads_settled_payment() {
  let app = test_app();
  let initiation = initiate_payment(&app.state, buyer(), checkout_request(1)).await.unwrap();
  handle_callback(&app.state, body(&success_callback(&initiation.checkout_request_id, 500)))
    .await
    .unwrap();

  let source = LocalStatusSource::new(app.state.clone(), buyer());
  let outcome = poll_until_resolved(&source, &initiation.checkout_request_id, settings(2))
    .await
    .unwrap();

  match outcome {
    PollOutcome::Succeeded(view) => assert!(view.order.is_some()),
    other => panic!("expected success, got {:?}", other),
  }
}

#[tokio::test]
async fn http_source_sends_identity_headers() {
  setup_tracing();
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/v1/payment-status/ws_CO_http"))
    .and(header("X-User-ID", BUYER_ID.to_string().as_str()))
    .and(header("X-User-Role", "customer"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "success": true,
      "data": {
        "paymentIntentId": 7,
        "checkoutRequestId": "ws_CO_http",
        "status": "FAILED",
        "amount": "1000",
        "phone": BUYER_PHONE,
        "order": null,
        "failureReason": "Request cancelled by user"
      }
    })))
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("GET"))
    .and(path("/api/v1/payment-status/ws_CO_missing"))
    .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "success": false, "error": "not found" })))
    .mount(&server)
    .await;

  let source = HttpStatusSource::new(server.uri(), buyer()).unwrap();
  let fast = PollSettings {
    interval: Duration::from_millis(5),
    max_attempts: 3,
  };

  let outcome = poll_until_resolved(&source, "ws_CO_http", fast).await.unwrap();
  match outcome {
    PollOutcome::Failed(view) => {
      assert_eq!(view.payment_intent_id, 7);
      assert_eq!(view.failure_reason.as_deref(), Some("Request cancelled by user"));
    }
    other => panic!("expected failure, got {:?}", other),
  }

  let err = poll_until_resolved(&source, "ws_CO_missing", fast).await.unwrap_err();
  assert!(matches!(err, AppError::NotFound(_)), "got {:?}", err);
}
