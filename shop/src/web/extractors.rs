// shop/src/web/extractors.rs

use crate::errors::AppError;
use crate::models::{AuthenticatedUser, UserRole};
use actix_web::{dev::Payload, FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};
use tracing::warn;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
  req.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Identity comes from the upstream auth layer. A missing role means customer.
fn authenticate(req: &HttpRequest) -> Result<AuthenticatedUser, AppError> {
  let user_id = header(req, USER_ID_HEADER)
    .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
    .ok_or_else(|| AppError::Auth("Authentication required".to_string()))?;
  let role = match header(req, USER_ROLE_HEADER) {
    None => UserRole::Customer,
    Some(raw) => UserRole::parse(raw).ok_or_else(|| AppError::Auth(format!("Unknown role '{}'", raw)))?,
  };
  Ok(AuthenticatedUser { user_id, role })
}

impl FromRequest for AuthenticatedUser {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
    let result = authenticate(req);
    if let Err(e) = &result {
      warn!(path = %req.path(), error = %e, "Rejected unauthenticated request.");
    }
    ready(result)
  }
}
