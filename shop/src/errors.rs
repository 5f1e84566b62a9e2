// shop/src/errors.rs

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::services::gateway::GatewayError;
use hera_flow::FlowError;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Invalid product: {0}")]
  InvalidProduct(String),

  #[error("Variant not found: {0}")]
  VariantNotFound(String),

  #[error("Insufficient stock: {0}")]
  InsufficientStock(String),

  /// Stock ran out between payment initiation and order materialization.
  #[error("Stock conflict: {0}")]
  StockConflict(String),

  #[error("Authentication Failed: {0}")]
  Auth(String),

  #[error("Forbidden: {0}")]
  Forbidden(String),

  #[error("Resource Not Found: {0}")]
  NotFound(String),

  #[error("Payment gateway unavailable: {0}")]
  GatewayAuth(String),

  #[error("Payment request failed: {0}")]
  GatewayRequest(String),

  /// The gateway answered, but refused the push (non-zero response code).
  #[error("Payment request rejected ({code}): {description}")]
  PushRejected { code: String, description: String },

  #[error("Invalid payment state transition: {0}")]
  InvalidTransition(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Serialization Error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("Workflow Error: {source}")]
  Workflow {
    #[from]
    source: FlowError,
  },

  #[error("Internal Server Error: {0}")]
  Internal(String),

  #[error("Pipeline execution was halted by a handler.")]
  PipelineHaltedByHandler,
}

impl AppError {
  pub fn is_stock_conflict(&self) -> bool {
    matches!(self, AppError::StockConflict(_))
  }

  /// Message safe to show to storefront users.
  fn public_message(&self) -> String {
    match self {
      AppError::Sqlx(_) => "Database operation failed".to_string(),
      AppError::Serialization(_) => "Stored data could not be processed".to_string(),
      AppError::Workflow { .. } | AppError::Internal(_) | AppError::PipelineHaltedByHandler => {
        "An internal error occurred".to_string()
      }
      AppError::Config(_) => "Configuration issue".to_string(),
      AppError::GatewayAuth(_) => {
        "Mobile payment service is temporarily unavailable. Please try again shortly.".to_string()
      }
      other => other.to_string(),
    }
  }
}

impl From<GatewayError> for AppError {
  fn from(err: GatewayError) -> Self {
    match err {
      GatewayError::Auth(m) => AppError::GatewayAuth(m),
      GatewayError::Request(m) => AppError::GatewayRequest(m),
    }
  }
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    match err.downcast::<sqlx::Error>() {
      Ok(sqlx_err) => AppError::Sqlx(sqlx_err),
      Err(err) => AppError::Internal(format!("{:#}", err)),
    }
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    match self {
      AppError::Validation(_)
      | AppError::InvalidProduct(_)
      | AppError::VariantNotFound(_)
      | AppError::InsufficientStock(_)
      | AppError::GatewayRequest(_)
      | AppError::PushRejected { .. } => StatusCode::BAD_REQUEST,
      AppError::Auth(_) => StatusCode::UNAUTHORIZED,
      AppError::Forbidden(_) => StatusCode::FORBIDDEN,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::StockConflict(_) | AppError::InvalidTransition(_) | AppError::PipelineHaltedByHandler => {
        StatusCode::CONFLICT
      }
      AppError::GatewayAuth(_) => StatusCode::SERVICE_UNAVAILABLE,
      AppError::Config(_)
      | AppError::Sqlx(_)
      | AppError::Serialization(_)
      | AppError::Workflow { .. }
      | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn error_response(&self) -> HttpResponse {
    let status = self.status_code();
    if status.is_server_error() {
      tracing::error!(application_error = %self, "Responding with error");
    } else {
      tracing::warn!(application_error = %self, "Responding with client error");
    }
    HttpResponse::build(status).json(json!({
      "success": false,
      "error": self.public_message(),
    }))
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
