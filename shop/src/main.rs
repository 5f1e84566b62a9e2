// shop/src/main.rs

use actix_web::{web as actix_data, App, HttpServer};
use anyhow::Context;
use hera_shop::config::{AppConfig, StorageBackend};
use hera_shop::errors::AppError;
use hera_shop::services::clock::{Clock, SystemClock};
use hera_shop::services::expiry::spawn_expiry_sweeper;
use hera_shop::services::gateway::build_gateway;
use hera_shop::services::notifications::LogNotifier;
use hera_shop::state::AppState;
use hera_shop::store::memory::MemoryStore;
use hera_shop::store::postgres::PgStore;
use hera_shop::store::demo_catalog;
use hera_shop::web::configure_app_routes;
use sqlx::PgPool;
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_span_events(FmtSpan::CLOSE);
  if json {
    builder.json().init();
  } else {
    builder.init();
  }
}

fn startup_error(e: impl std::fmt::Display) -> std::io::Error {
  std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

async fn build_state(config: Arc<AppConfig>) -> Result<AppState, AppError> {
  let clock: Arc<dyn Clock> = Arc::new(SystemClock);
  let gateway = build_gateway(&config.mpesa, clock.clone())?;
  let notifier = Arc::new(LogNotifier::new(config.mail_sender.clone()));

  match config.storage_backend {
    StorageBackend::Postgres => {
      let url = config
        .database_url
        .clone()
        .ok_or_else(|| AppError::Config("DATABASE_URL is not set".to_string()))?;
      let pool = PgPool::connect(&url)
        .await
        .context("Failed to connect to the database")?;
      tracing::info!("Successfully connected to the database.");
      let store = Arc::new(PgStore::new(pool));
      if config.run_migrations {
        store.run_migrations().await?;
      }
      if config.seed_db {
        store.seed_catalog(demo_catalog(clock.now())).await?;
        tracing::info!("Demo catalog seeded.");
      }
      Ok(AppState::new(config, store, gateway, notifier, clock))
    }
    StorageBackend::Memory => {
      tracing::warn!("Using the in-memory store; data is lost on restart.");
      let store = Arc::new(MemoryStore::new(clock.clone()));
      if config.seed_db {
        store.seed(demo_catalog(clock.now()));
        tracing::info!("Demo catalog seeded.");
      }
      Ok(AppState::new(config, store, gateway, notifier, clock))
    }
  }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  let app_config = match AppConfig::from_env() {
    Ok(cfg) => Arc::new(cfg),
    Err(e) => {
      init_tracing(false);
      tracing::error!(error = %e, "Failed to load application configuration.");
      return Err(startup_error(e));
    }
  };
  init_tracing(app_config.log_json);
  tracing::info!(
    backend = ?app_config.storage_backend,
    gateway = ?app_config.mpesa.environment,
    "Starting Hera Collection payment service..."
  );

  let app_state = build_state(app_config.clone()).await.map_err(|e| {
    tracing::error!(error = %e, "Failed to initialize application state.");
    startup_error(e)
  })?;
  let _sweeper = spawn_expiry_sweeper(app_state.clone());

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  tracing::info!("Binding server to {}...", server_address);

  HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone()))
      .app_data(hera_shop::web::json_config())
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await
}
