//! Account policy: password strength, username shape, and lockout transitions.

use chrono::{DateTime, Duration, Utc};
use validator::ValidateEmail;

use crate::config::{LockoutConfig, PasswordPolicy};
use crate::models::NewUser;

const MAX_USERNAME_LENGTH: usize = 256;
const USERNAME_EXTRA_CHARS: &[char] = &['-', '.', '_', '@', '+'];
const SPECIAL_CHARS: &str = r#"!@#$%^&*()-_=+[]{}|\;:'",.<>/?`~"#;

/// Errors related to password policy validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    PasswordTooShort {
        min_length: usize,
        actual_length: usize,
    },
    PasswordMissingUppercase,
    PasswordMissingNumber,
    PasswordMissingSpecial,
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::PasswordTooShort {
                min_length,
                actual_length,
            } => {
                write!(
                    f,
                    "Password must be at least {} characters (got {})",
                    min_length, actual_length
                )
            }
            PolicyError::PasswordMissingUppercase => {
                write!(f, "Password must contain at least one uppercase letter")
            }
            PolicyError::PasswordMissingNumber => {
                write!(f, "Password must contain at least one number")
            }
            PolicyError::PasswordMissingSpecial => {
                write!(f, "Password must contain at least one special character")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// Outcome of a failed password attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureOutcome {
    pub access_failed_count: i32,
    pub lockout_end_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PolicyService {
    password: PasswordPolicy,
    lockout: LockoutConfig,
}

impl PolicyService {
    pub fn new(password: PasswordPolicy, lockout: LockoutConfig) -> Self {
        Self { password, lockout }
    }

    pub fn lockout(&self) -> &LockoutConfig {
        &self.lockout
    }

    /// Validate a password and return every violation found.
    pub fn validate_password(&self, password: &str) -> Vec<PolicyError> {
        let mut errors = Vec::new();
        let length = password.chars().count();

        if length < self.password.min_length {
            errors.push(PolicyError::PasswordTooShort {
                min_length: self.password.min_length,
                actual_length: length,
            });
        }

        if self.password.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            errors.push(PolicyError::PasswordMissingUppercase);
        }

        if self.password.require_number && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push(PolicyError::PasswordMissingNumber);
        }

        if self.password.require_special && !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
            errors.push(PolicyError::PasswordMissingSpecial);
        }

        errors
    }

    /// Field-level checks that do not need the store. Uniqueness is checked by the directory.
    pub fn validate_new_user(&self, new_user: &NewUser) -> Vec<String> {
        let mut errors = Vec::new();
        let username = new_user.username.trim();

        if username.is_empty() {
            errors.push("Username is required.".to_string());
        } else if username.chars().count() > MAX_USERNAME_LENGTH {
            errors.push(format!(
                "Username must be at most {} characters.",
                MAX_USERNAME_LENGTH
            ));
        } else if !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || USERNAME_EXTRA_CHARS.contains(&c))
        {
            errors.push(format!(
                "Username '{}' is invalid, can only contain letters, digits or -._@+",
                username
            ));
        }

        if let Some(email) = new_user.email.as_deref() {
            if !email.validate_email() {
                errors.push(format!("Email '{}' is invalid.", email));
            }
        }

        if let Some(password) = &new_user.password {
            errors.extend(
                self.validate_password(password.as_str())
                    .into_iter()
                    .map(|e| e.to_string()),
            );
        }

        errors
    }

    /// Counter transition for one more consecutive failure.
    ///
    /// Reaching the threshold locks the account and resets the counter.
    pub fn record_failure(&self, access_failed_count: i32, now: DateTime<Utc>) -> FailureOutcome {
        let attempts = access_failed_count.saturating_add(1);
        if attempts >= self.lockout.max_failed_attempts {
            FailureOutcome {
                access_failed_count: 0,
                lockout_end_utc: Some(now + Duration::minutes(self.lockout.lockout_minutes)),
            }
        } else {
            FailureOutcome {
                access_failed_count: attempts,
                lockout_end_utc: None,
            }
        }
    }
}
