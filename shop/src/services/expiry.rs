// shop/src/services/expiry.rs

use crate::errors::{AppError, Result};
use crate::models::{FailureInfo, FailureKind, TransitionOutcome};
use crate::services::notifications::{self, dispatch};
use crate::state::AppState;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

const SWEEP_BATCH: i64 = 100;

/// Moves PENDING intents older than the sweep window to FAILED (`expired`).
/// Returns how many intents were closed.
#[instrument(name = "expiry::sweep", skip(state))]
pub async fn sweep_expired_intents(state: &AppState) -> Result<usize> {
  let settings = &state.config.payments;
  let now = state.clock.now();
  let cutoff = now - settings.sweep_after();
  let stale = state.intents.list_stale_pending(cutoff, SWEEP_BATCH).await?;

  let mut closed = 0;
  for intent in stale {
    let failure = FailureInfo {
      reason: format!(
        "No payment confirmation received within {} minutes",
        settings.sweep_after_secs / 60
      ),
      kind: FailureKind::Expired,
      requires_refund: false,
      failed_at: now,
    };
    let reason = failure.reason.clone();
    match state.intents.transition_to_failed(intent.id, failure, None).await {
      Ok(TransitionOutcome::Applied) => {
        info!(payment_intent_id = intent.id, checkout_request_id = %intent.checkout_request_id, "Expired stale payment intent.");
        dispatch(state.notifier.clone(), notifications::payment_failed(&intent, &reason));
        closed += 1;
      }
      Ok(TransitionOutcome::Unchanged(status)) => {
        debug!(payment_intent_id = intent.id, %status, "Intent already closed.");
      }
      // A callback settled it between the listing and the update.
      Err(AppError::InvalidTransition(msg)) => {
        debug!(payment_intent_id = intent.id, %msg, "Intent settled concurrently; left as is.");
      }
      Err(e) => {
        warn!(payment_intent_id = intent.id, error = %e, "Could not expire intent.");
      }
    }
  }
  Ok(closed)
}

/// Starts the periodic sweep when `sweep_interval_secs > 0`.
pub fn spawn_expiry_sweeper(state: AppState) -> Option<JoinHandle<()>> {
  let interval_secs = state.config.payments.sweep_interval_secs;
  if interval_secs == 0 {
    debug!("Payment expiry sweeper disabled.");
    return None;
  }
  info!(interval_secs, after_secs = state.config.payments.sweep_after_secs, "Starting payment expiry sweeper.");
  Some(tokio::spawn(async move {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
      ticker.tick().await;
      if let Err(e) = sweep_expired_intents(&state).await {
        error!(error = %e, "Payment expiry sweep failed.");
      }
    }
  }))
}
