// shop/src/services/poller.rs

//! Client side of the status contract: poll at a fixed interval for a bounded
//! number of attempts until the payment resolves.

use crate::config::PaymentSettings;
use crate::errors::{AppError, Result};
use crate::models::{AuthenticatedUser, PaymentStatus, UserRole};
use crate::services::status::{payment_status, PaymentStatusView};
use crate::state::AppState;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
  pub interval: Duration,
  pub max_attempts: u32,
}

impl Default for PollSettings {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(30),
      max_attempts: 20,
    }
  }
}

impl From<&PaymentSettings> for PollSettings {
  fn from(settings: &PaymentSettings) -> Self {
    Self {
      interval: Duration::from_secs(settings.poll_interval_secs),
      max_attempts: settings.poll_max_attempts,
    }
  }
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
  Succeeded(PaymentStatusView),
  Failed(PaymentStatusView),
  /// Advisory: the payment may still complete later.
  TimedOut {
    attempts: u32,
    last_seen: Option<PaymentStatusView>,
  },
}

#[async_trait]
pub trait StatusSource: Send + Sync {
  async fn fetch_status(&self, checkout_request_id: &str) -> Result<PaymentStatusView>;
}

/// Reads status through the HTTP API, as the storefront does.
pub struct HttpStatusSource {
  http: reqwest::Client,
  base_url: String,
  requester: AuthenticatedUser,
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
  #[serde(default)]
  data: Option<PaymentStatusView>,
  #[serde(default)]
  error: Option<String>,
}

impl HttpStatusSource {
  pub fn new(base_url: impl Into<String>, requester: AuthenticatedUser) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(15))
      .build()
      .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
    Ok(Self {
      http,
      base_url: base_url.into().trim_end_matches('/').to_string(),
      requester,
    })
  }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
  async fn fetch_status(&self, checkout_request_id: &str) -> Result<PaymentStatusView> {
    let role = match self.requester.role {
      UserRole::Admin => "admin",
      UserRole::Customer => "customer",
    };
    let response = self
      .http
      .get(format!("{}/api/v1/payment-status/{}", self.base_url, checkout_request_id))
      .header("X-User-ID", self.requester.user_id.to_string())
      .header("X-User-Role", role)
      .send()
      .await
      .map_err(|e| AppError::Internal(format!("Status request failed: {}", e)))?;

    let status = response.status();
    let envelope: StatusEnvelope = response
      .json()
      .await
      .map_err(|e| AppError::Internal(format!("Unreadable status response: {}", e)))?;
    let message = envelope.error.unwrap_or_else(|| status.to_string());
    match status {
      StatusCode::NOT_FOUND => Err(AppError::NotFound(message)),
      StatusCode::FORBIDDEN => Err(AppError::Forbidden(message)),
      s if s.is_success() => envelope
        .data
        .ok_or_else(|| AppError::Internal("Status response carried no data".to_string())),
      _ => Err(AppError::Internal(message)),
    }
  }
}

/// Reads status straight from the application state.
pub struct LocalStatusSource {
  state: AppState,
  requester: AuthenticatedUser,
}

impl LocalStatusSource {
  pub fn new(state: AppState, requester: AuthenticatedUser) -> Self {
    Self { state, requester }
  }
}

#[async_trait]
impl StatusSource for LocalStatusSource {
  async fn fetch_status(&self, checkout_request_id: &str) -> Result<PaymentStatusView> {
    payment_status(&self.state, checkout_request_id, &self.requester).await
  }
}

/// Polls until SUCCESS or FAILED, or until `max_attempts` reads stayed PENDING.
///
/// Transient read errors count as attempts; not-found and forbidden end the loop.
#[instrument(name = "poller::poll_until_resolved", skip(source))]
pub async fn poll_until_resolved(
  source: &dyn StatusSource,
  checkout_request_id: &str,
  settings: PollSettings,
) -> Result<PollOutcome> {
  let mut last_seen = None;
  for attempt in 1..=settings.max_attempts {
    match source.fetch_status(checkout_request_id).await {
      Ok(view) => match view.status {
        PaymentStatus::Success => {
          info!(attempt, "Payment confirmed.");
          return Ok(PollOutcome::Succeeded(view));
        }
        PaymentStatus::Failed => {
          info!(attempt, reason = ?view.failure_reason, "Payment failed.");
          return Ok(PollOutcome::Failed(view));
        }
        PaymentStatus::Pending => last_seen = Some(view),
      },
      Err(e @ (AppError::NotFound(_) | AppError::Forbidden(_))) => return Err(e),
      Err(e) => warn!(attempt, error = %e, "Status read failed; will try again."),
    }
    if attempt < settings.max_attempts {
      tokio::time::sleep(settings.interval).await;
    }
  }

  warn!(attempts = settings.max_attempts, "Gave up waiting for payment confirmation.");
  Ok(PollOutcome::TimedOut {
    attempts: settings.max_attempts,
    last_seen,
  })
}
