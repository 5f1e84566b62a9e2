// shop/src/web/mod.rs

pub mod extractors;
pub mod handlers;
pub mod routes;

pub use routes::configure_app_routes;

use crate::errors::AppError;
use actix_web::web::JsonConfig;

/// Malformed request bodies surface as 400 validation errors in the usual error envelope.
pub fn json_config() -> JsonConfig {
  JsonConfig::default().error_handler(|err, _req| AppError::Validation(format!("Invalid request body: {}", err)).into())
}
