// shop/src/web/handlers/callback_handlers.rs

use crate::pipelines::handle_callback;
use crate::services::gateway::callback::CallbackAck;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use tracing::{error, info, instrument};

/// Gateway webhook. Takes the raw body so malformed JSON is acknowledged rather than rejected.
#[instrument(name = "handler::mpesa_callback", skip(app_state, body), fields(body_len = body.len()))]
pub async fn mpesa_callback_handler(app_state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
  let raw = body.clone();
  match handle_callback(app_state.get_ref(), body).await {
    Ok((outcome, ack)) => {
      info!(?outcome, "Callback acknowledged.");
      HttpResponse::Ok().json(ack)
    }
    Err(e) => {
      error!(
        error = %e,
        raw_body = %String::from_utf8_lossy(&raw),
        "Callback processing failed; asking the gateway to redeliver."
      );
      HttpResponse::InternalServerError().json(CallbackAck::failed("Internal error while processing callback"))
    }
  }
}
