// shop/src/web/handlers/payment_handlers.rs

use crate::errors::AppError;
use crate::models::{AuthenticatedUser, CheckoutRequest};
use crate::pipelines::{initiate_payment, retry_payment};
use crate::services::status::payment_status;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

#[derive(Debug, Default, Deserialize)]
pub struct RetryPaymentPayload {
  #[serde(default)]
  pub phone: Option<String>,
}

#[instrument(
  name = "handler::initiate_payment",
  skip(app_state, req_payload, auth_user),
  fields(buyer_id = %auth_user.user_id, lines = req_payload.items.len())
)]
pub async fn initiate_payment_handler(
  app_state: web::Data<AppState>,
  req_payload: web::Json<CheckoutRequest>,
  auth_user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
  let initiation = initiate_payment(app_state.get_ref(), auth_user, req_payload.into_inner()).await?;
  info!(
    checkout_request_id = %initiation.checkout_request_id,
    payment_intent_id = initiation.payment_intent_id,
    "Payment prompt sent."
  );
  Ok(HttpResponse::Ok().json(json!({ "success": true, "data": initiation })))
}

#[instrument(name = "handler::payment_status", skip(app_state, auth_user), fields(requester = %auth_user.user_id))]
pub async fn payment_status_handler(
  app_state: web::Data<AppState>,
  path: web::Path<String>,
  auth_user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
  let checkout_request_id = path.into_inner();
  let view = payment_status(app_state.get_ref(), &checkout_request_id, &auth_user).await?;
  Ok(HttpResponse::Ok().json(json!({ "success": true, "data": view })))
}

#[instrument(
  name = "handler::retry_payment",
  skip(app_state, req_payload, auth_user),
  fields(requester = %auth_user.user_id)
)]
pub async fn retry_payment_handler(
  app_state: web::Data<AppState>,
  path: web::Path<i64>,
  req_payload: Option<web::Json<RetryPaymentPayload>>,
  auth_user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
  let payment_intent_id = path.into_inner();
  let phone = req_payload.and_then(|p| p.into_inner().phone);
  let initiation = retry_payment(app_state.get_ref(), auth_user, payment_intent_id, phone).await?;
  info!(
    retried_from = payment_intent_id,
    payment_intent_id = initiation.payment_intent_id,
    "Payment retry prompt sent."
  );
  Ok(HttpResponse::Ok().json(json!({ "success": true, "data": initiation })))
}
