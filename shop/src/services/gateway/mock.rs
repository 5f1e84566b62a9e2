// shop/src/services/gateway/mock.rs

use super::{GatewayError, PaymentGateway, PushRequest, PushResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, instrument};
use uuid::Uuid;

/// How the mock answers the next pushes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MockBehavior {
  #[default]
  Accept,
  /// Answers with a non-zero response code.
  Reject { code: String, description: String },
  AuthFailure,
  RequestFailure(String),
}

/// In-process gateway used in mock mode and tests. Records every push it sees.
#[derive(Debug, Default)]
pub struct MockGateway {
  behavior: Mutex<MockBehavior>,
  pushes: Mutex<Vec<PushRequest>>,
  issued: Mutex<Vec<PushResponse>>,
}

impl MockGateway {
  pub fn with_behavior(behavior: MockBehavior) -> Self {
    let gateway = Self::default();
    gateway.set_behavior(behavior);
    gateway
  }

  pub fn set_behavior(&self, behavior: MockBehavior) {
    *self.behavior.lock() = behavior;
  }

  pub fn pushes(&self) -> Vec<PushRequest> {
    self.pushes.lock().clone()
  }

  pub fn push_count(&self) -> usize {
    self.pushes.lock().len()
  }

  /// Accepted push responses, oldest first.
  pub fn issued(&self) -> Vec<PushResponse> {
    self.issued.lock().clone()
  }

  pub fn last_checkout_id(&self) -> Option<String> {
    self.issued.lock().last().map(|r| r.checkout_request_id.clone())
  }
}

#[async_trait]
impl PaymentGateway for MockGateway {
  #[instrument(name = "mock_gateway::initiate_push", skip(self, request), fields(account_reference = %request.account_reference))]
  async fn initiate_push(&self, request: PushRequest) -> Result<PushResponse, GatewayError> {
    self.pushes.lock().push(request.clone());
    let behavior = self.behavior.lock().clone();

    match behavior {
      MockBehavior::AuthFailure => Err(GatewayError::Auth("mock credentials rejected".to_string())),
      MockBehavior::RequestFailure(message) => Err(GatewayError::Request(message)),
      MockBehavior::Reject { code, description } => {
        info!(%code, "Mock gateway rejecting push.");
        Ok(PushResponse {
          response_code: code,
          response_description: description,
          merchant_request_id: String::new(),
          checkout_request_id: String::new(),
          customer_message: None,
        })
      }
      MockBehavior::Accept => {
        let id = Uuid::new_v4().simple().to_string();
        let response = PushResponse {
          response_code: "0".to_string(),
          response_description: "Success. Request accepted for processing".to_string(),
          merchant_request_id: format!("mock-{}", &id[..12]),
          checkout_request_id: format!("ws_CO_{}", id),
          customer_message: Some("Success. Request accepted for processing".to_string()),
        };
        info!(checkout_request_id = %response.checkout_request_id, "Mock gateway accepted push.");
        self.issued.lock().push(response.clone());
        Ok(response)
      }
    }
  }

  fn name(&self) -> &'static str {
    "mock"
  }
}
