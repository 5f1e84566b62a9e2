// shop/src/state.rs

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::pipelines;
use crate::services::clock::Clock;
use crate::services::gateway::PaymentGateway;
use crate::services::notifications::Notifier;
use crate::store::{CatalogStore, OrderStore, PaymentIntentStore};
use hera_flow::FlowRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub flows: Arc<FlowRegistry<AppError>>,
  pub config: Arc<AppConfig>,
  pub catalog: Arc<dyn CatalogStore>,
  pub intents: Arc<dyn PaymentIntentStore>,
  pub orders: Arc<dyn OrderStore>,
  pub gateway: Arc<dyn PaymentGateway>,
  pub notifier: Arc<dyn Notifier>,
  pub clock: Arc<dyn Clock>,
}

impl AppState {
  /// Builds the state over one store serving catalog, intents and orders, and registers the pipelines.
  pub fn new<S>(
    config: Arc<AppConfig>,
    store: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
  ) -> Self
  where
    S: CatalogStore + PaymentIntentStore + OrderStore + 'static,
  {
    let flows = Arc::new(FlowRegistry::new());
    pipelines::register_all_pipelines(&flows);
    Self {
      flows,
      config,
      catalog: store.clone(),
      intents: store.clone(),
      orders: store,
      gateway,
      notifier,
      clock,
    }
  }
}
