// shop/src/web/routes.rs

use crate::web::handlers::{callback_handlers, payment_handlers};
use actix_web::web;

async fn health_check_handler() -> actix_web::HttpResponse {
  actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/payments")
          .route("/mpesa/callback", web::post().to(callback_handlers::mpesa_callback_handler))
          .route("/mpesa", web::post().to(payment_handlers::initiate_payment_handler))
          .route(
            "/{payment_intent_id}/retry",
            web::post().to(payment_handlers::retry_payment_handler),
          ),
      )
      .route(
        "/payment-status/{checkout_request_id}",
        web::get().to(payment_handlers::payment_status_handler),
      ),
  );
}
