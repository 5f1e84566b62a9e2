// shop/src/pipelines/mod.rs

//! The payment flows, each a `hera_flow` pipeline registered by context type.

use crate::errors::AppError;
use hera_flow::FlowRegistry;

pub mod callback_pipeline;
pub mod common_steps;
pub mod contexts;
pub mod initiate_pipeline;
pub mod retry_pipeline;

pub use callback_pipeline::handle_callback;
pub use contexts::{CallbackOutcome, PaymentInitiation};
pub use initiate_pipeline::initiate_payment;
pub use retry_pipeline::retry_payment;

/// Registers every payment pipeline. Called once while building `AppState`.
pub fn register_all_pipelines(flows: &FlowRegistry<AppError>) {
  tracing::info!("Registering payment pipelines...");
  initiate_pipeline::register_initiate_pipeline(flows);
  callback_pipeline::register_callback_pipeline(flows);
  retry_pipeline::register_retry_pipeline(flows);
  tracing::info!("All payment pipelines registered.");
}
