// shop/src/config.rs

use crate::errors::{AppError, Result};
use chrono::Duration;
use dotenvy::dotenv;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
  Postgres,
  /// In-process store; state is lost on restart.
  Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpesaEnvironment {
  Sandbox,
  Production,
  /// No network calls; pushes are accepted locally.
  Mock,
}

impl MpesaEnvironment {
  pub fn default_base_url(self) -> &'static str {
    match self {
      MpesaEnvironment::Production => "https://api.safaricom.co.ke",
      MpesaEnvironment::Sandbox | MpesaEnvironment::Mock => "https://sandbox.safaricom.co.ke",
    }
  }
}

#[derive(Clone)]
pub struct MpesaConfig {
  pub environment: MpesaEnvironment,
  pub base_url: String,
  pub consumer_key: String,
  pub consumer_secret: String,
  pub shortcode: String,
  pub passkey: String,
  pub callback_url: String,
  pub transaction_type: String,
}

// Secrets stay out of logs.
impl std::fmt::Debug for MpesaConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MpesaConfig")
      .field("environment", &self.environment)
      .field("base_url", &self.base_url)
      .field("shortcode", &self.shortcode)
      .field("callback_url", &self.callback_url)
      .field("transaction_type", &self.transaction_type)
      .finish_non_exhaustive()
  }
}

/// Upper bound for the staleness and sweep windows: 30 days.
pub const MAX_WINDOW_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct PaymentSettings {
  /// Age after which a PENDING intent is reported as `expired` by the status endpoint.
  pub stale_after_secs: i64,
  pub poll_interval_secs: u64,
  pub poll_max_attempts: u32,
  /// `0` disables the background expiry sweeper.
  pub sweep_interval_secs: u64,
  pub sweep_after_secs: i64,
  pub shipping_flat_fee: Decimal,
}

impl PaymentSettings {
  pub fn validate(&self) -> Result<()> {
    for (name, secs) in [
      ("PAYMENT_STALE_AFTER_SECS", self.stale_after_secs),
      ("PAYMENT_SWEEP_AFTER_SECS", self.sweep_after_secs),
    ] {
      if !(1..=MAX_WINDOW_SECS).contains(&secs) {
        return Err(AppError::Config(format!(
          "{} must be between 1 and {} seconds, got {}",
          name, MAX_WINDOW_SECS, secs
        )));
      }
    }
    if self.shipping_flat_fee.is_sign_negative() {
      return Err(AppError::Config("SHIPPING_FLAT_FEE must not be negative".to_string()));
    }
    Ok(())
  }

  pub fn stale_after(&self) -> Duration {
    Duration::seconds(self.stale_after_secs.clamp(0, MAX_WINDOW_SECS))
  }

  pub fn sweep_after(&self) -> Duration {
    Duration::seconds(self.sweep_after_secs.clamp(0, MAX_WINDOW_SECS))
  }
}

impl Default for PaymentSettings {
  fn default() -> Self {
    Self {
      stale_after_secs: 300,
      poll_interval_secs: 30,
      poll_max_attempts: 20,
      sweep_interval_secs: 0,
      sweep_after_secs: 3600,
      shipping_flat_fee: Decimal::ZERO,
    }
  }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  pub database_url: Option<String>,
  pub storage_backend: StorageBackend,
  pub run_migrations: bool,
  pub seed_db: bool,
  pub log_json: bool,
  pub mpesa: MpesaConfig,
  pub mail_sender: String,
  pub admin_email: String,
  pub payments: PaymentSettings,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      server_host: "127.0.0.1".to_string(),
      server_port: 8080,
      database_url: None,
      storage_backend: StorageBackend::Memory,
      run_migrations: false,
      seed_db: false,
      log_json: false,
      mpesa: MpesaConfig {
        environment: MpesaEnvironment::Mock,
        base_url: MpesaEnvironment::Mock.default_base_url().to_string(),
        consumer_key: String::new(),
        consumer_secret: String::new(),
        shortcode: "174379".to_string(),
        passkey: String::new(),
        callback_url: "http://127.0.0.1:8080/api/v1/payments/mpesa/callback".to_string(),
        transaction_type: "CustomerPayBillOnline".to_string(),
      },
      mail_sender: "orders@heracollection.co.ke".to_string(),
      admin_email: "admin@heracollection.co.ke".to_string(),
      payments: PaymentSettings::default(),
    }
  }
}

fn parse_value<T>(var_name: &str, raw: &str) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  raw
    .trim()
    .parse::<T>()
    .map_err(|e| AppError::Config(format!("Invalid {} value '{}': {}", var_name, raw, e)))
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();

    let get_env = |var_name: &str| {
      env::var(var_name).map_err(|e| AppError::Config(format!("Missing environment variable '{}': {}", var_name, e)))
    };
    let get_parsed = |var_name: &str, default: &str| -> Result<String> {
      Ok(get_env(var_name).unwrap_or_else(|_| default.to_string()))
    };

    let defaults = Self::default();

    let server_host = get_parsed("SERVER_HOST", &defaults.server_host)?;
    let server_port: u16 = parse_value("SERVER_PORT", &get_parsed("SERVER_PORT", "8080")?)?;

    let storage_backend = match get_parsed("STORAGE_BACKEND", "postgres")?.to_lowercase().as_str() {
      "postgres" => StorageBackend::Postgres,
      "memory" => StorageBackend::Memory,
      other => return Err(AppError::Config(format!("Unknown STORAGE_BACKEND '{}'", other))),
    };
    let database_url = get_env("DATABASE_URL").ok();
    if storage_backend == StorageBackend::Postgres && database_url.is_none() {
      return Err(AppError::Config(
        "DATABASE_URL is required when STORAGE_BACKEND=postgres".to_string(),
      ));
    }

    let run_migrations: bool = parse_value("RUN_MIGRATIONS", &get_parsed("RUN_MIGRATIONS", "false")?)?;
    let seed_db: bool = parse_value("SEED_DB", &get_parsed("SEED_DB", "false")?)?;
    let log_json = get_parsed("LOG_FORMAT", "pretty")?.eq_ignore_ascii_case("json");

    let environment = match get_parsed("MPESA_ENVIRONMENT", "sandbox")?.to_lowercase().as_str() {
      "sandbox" => MpesaEnvironment::Sandbox,
      "production" => MpesaEnvironment::Production,
      "mock" => MpesaEnvironment::Mock,
      other => return Err(AppError::Config(format!("Unknown MPESA_ENVIRONMENT '{}'", other))),
    };
    // Credentials are only mandatory when talking to the real gateway.
    let credential = |var_name: &str| -> Result<String> {
      match environment {
        MpesaEnvironment::Mock => Ok(get_env(var_name).unwrap_or_default()),
        _ => get_env(var_name),
      }
    };
    let mpesa = MpesaConfig {
      environment,
      base_url: get_parsed("MPESA_BASE_URL", environment.default_base_url())?
        .trim_end_matches('/')
        .to_string(),
      consumer_key: credential("MPESA_CONSUMER_KEY")?,
      consumer_secret: credential("MPESA_CONSUMER_SECRET")?,
      shortcode: get_parsed("MPESA_SHORTCODE", &defaults.mpesa.shortcode)?,
      passkey: credential("MPESA_PASSKEY")?,
      callback_url: get_parsed(
        "MPESA_CALLBACK_URL",
        &format!("http://{}:{}/api/v1/payments/mpesa/callback", server_host, server_port),
      )?,
      transaction_type: get_parsed("MPESA_TRANSACTION_TYPE", &defaults.mpesa.transaction_type)?,
    };

    let payments = PaymentSettings {
      stale_after_secs: parse_value("PAYMENT_STALE_AFTER_SECS", &get_parsed("PAYMENT_STALE_AFTER_SECS", "300")?)?,
      poll_interval_secs: parse_value(
        "PAYMENT_POLL_INTERVAL_SECS",
        &get_parsed("PAYMENT_POLL_INTERVAL_SECS", "30")?,
      )?,
      poll_max_attempts: parse_value(
        "PAYMENT_POLL_MAX_ATTEMPTS",
        &get_parsed("PAYMENT_POLL_MAX_ATTEMPTS", "20")?,
      )?,
      sweep_interval_secs: parse_value(
        "PAYMENT_SWEEP_INTERVAL_SECS",
        &get_parsed("PAYMENT_SWEEP_INTERVAL_SECS", "0")?,
      )?,
      sweep_after_secs: parse_value("PAYMENT_SWEEP_AFTER_SECS", &get_parsed("PAYMENT_SWEEP_AFTER_SECS", "3600")?)?,
      shipping_flat_fee: parse_value("SHIPPING_FLAT_FEE", &get_parsed("SHIPPING_FLAT_FEE", "0")?)?,
    };
    payments.validate()?;

    let config = Self {
      server_host,
      server_port,
      database_url,
      storage_backend,
      run_migrations,
      seed_db,
      log_json,
      mpesa,
      mail_sender: get_parsed("MAIL_SENDER", &defaults.mail_sender)?,
      admin_email: get_parsed("ADMIN_EMAIL", &defaults.admin_email)?,
      payments,
    };

    tracing::info!(
      storage = ?config.storage_backend,
      mpesa = ?config.mpesa,
      "Application configuration loaded successfully."
    );
    Ok(config)
  }
}
