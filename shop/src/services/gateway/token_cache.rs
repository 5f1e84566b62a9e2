// shop/src/services/gateway/token_cache.rs

use super::GatewayError;
use crate::services::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Provider lifetimes beyond a day are treated as a day.
const MAX_TOKEN_LIFETIME_SECS: i64 = 86_400;

#[derive(Debug, Clone)]
struct CachedToken {
  value: String,
  expires_at: DateTime<Utc>,
}

/// Holds one OAuth access token and refreshes it shortly before expiry.
///
/// The lock is held across the refresh, so concurrent callers share a single
/// token request instead of stampeding the token endpoint.
pub struct TokenCache {
  slot: Mutex<Option<CachedToken>>,
  clock: Arc<dyn Clock>,
  refresh_margin: Duration,
}

impl TokenCache {
  pub fn new(clock: Arc<dyn Clock>, refresh_margin: Duration) -> Self {
    Self {
      slot: Mutex::new(None),
      clock,
      refresh_margin,
    }
  }

  /// Returns the cached token, or calls `fetch` for a new `(token, expires_in_secs)`.
  /// Failed fetches are not cached.
  pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<String, GatewayError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(String, i64), GatewayError>>,
  {
    let mut slot = self.slot.lock().await;
    let now = self.clock.now();
    if let Some(token) = slot.as_ref() {
      if now + self.refresh_margin < token.expires_at {
        return Ok(token.value.clone());
      }
      debug!("Access token is about to expire; refreshing.");
    }

    let (value, expires_in) = fetch().await?;
    *slot = Some(CachedToken {
      value: value.clone(),
      expires_at: now + Duration::seconds(expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS)),
    });
    Ok(value)
  }

  pub async fn invalidate(&self) {
    *self.slot.lock().await = None;
  }
}
