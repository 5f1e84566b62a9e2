// shop/src/models/user.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
  Customer,
  Admin,
}

impl UserRole {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim().to_ascii_lowercase().as_str() {
      "customer" | "user" => Some(UserRole::Customer),
      "admin" => Some(UserRole::Admin),
      _ => None,
    }
  }
}

/// The caller identity established upstream of this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
  pub user_id: Uuid,
  pub role: UserRole,
}

impl AuthenticatedUser {
  pub fn customer(user_id: Uuid) -> Self {
    Self {
      user_id,
      role: UserRole::Customer,
    }
  }

  pub fn is_admin(&self) -> bool {
    self.role == UserRole::Admin
  }

  /// Owners and admins may act on a buyer's payments.
  pub fn can_access(&self, owner_id: Uuid) -> bool {
    self.is_admin() || self.user_id == owner_id
  }
}
