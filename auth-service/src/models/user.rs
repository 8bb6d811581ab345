//! User model - local accounts consulted by every login path.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::Password;

/// User entity.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    /// `None` for accounts created through federated registration.
    pub password_hash: Option<String>,
    pub email_confirmed: bool,
    pub two_factor_enabled: bool,
    pub access_failed_count: i32,
    pub lockout_end_utc: Option<DateTime<Utc>>,
    pub roles: Vec<String>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Build a user record from a registration request and an already-hashed password.
    pub fn from_new(new_user: &NewUser, password_hash: Option<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            username: new_user.username.clone(),
            email: new_user.email.clone(),
            phone_number: new_user.phone_number.clone(),
            password_hash,
            email_confirmed: new_user.email_confirmed,
            two_factor_enabled: false,
            access_failed_count: 0,
            lockout_end_utc: None,
            roles: new_user.roles.clone(),
            created_utc: Utc::now(),
        }
    }

    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        self.lockout_end_utc.map(|end| end > now).unwrap_or(false)
    }

    /// Phone number usable for a step-up code, if any.
    pub fn step_up_phone(&self) -> Option<&str> {
        self.phone_number
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Input for creating a user in the directory.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    /// `None` creates an account with no usable password.
    pub password: Option<Password>,
    pub email_confirmed: bool,
    pub roles: Vec<String>,
}
