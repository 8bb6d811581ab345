use serde::{Deserialize, Serialize};
use service_core::axum::http::StatusCode;
use service_core::error::AppError;
use thiserror::Error;

/// Why a directory bind did not succeed.
///
/// Kept for logs only; callers always see the same generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryFailure {
    /// Connection could not be opened or was lost mid-handshake.
    Unreachable,
    /// The service account bind was refused.
    ServiceBindRejected,
    /// The user bind was refused.
    UserBindRejected,
}

impl std::fmt::Display for DirectoryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryFailure::Unreachable => write!(f, "directory unreachable"),
            DirectoryFailure::ServiceBindRejected => write!(f, "service bind rejected"),
            DirectoryFailure::UserBindRejected => write!(f, "user bind rejected"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked")]
    AccountLocked,

    #[error("Email not confirmed")]
    EmailNotConfirmed,

    #[error("Captcha verification failed")]
    CaptchaFailed,

    #[error("Invalid two-factor code")]
    TwoFactorInvalid,

    #[error("Step-up factor unavailable")]
    StepUpUnavailable,

    #[error("Phone number required for two-factor authentication")]
    PhoneNumberRequired,

    #[error("Directory not configured")]
    DirectoryNotConfigured,

    #[error("Directory authentication failed: {0}")]
    DirectoryAuthFailed(DirectoryFailure),

    #[error("Federated identity not configured")]
    FederatedNotConfigured,

    #[error("Federated token invalid")]
    FederatedTokenInvalid,

    #[error("User not registered")]
    UserNotRegistered,

    #[error("User already registered")]
    AlreadyRegistered,

    #[error("Token invalid or expired")]
    TokenInvalidOrExpired,

    #[error("IP address mismatch")]
    IpMismatch,

    #[error("Validation failed: {}", .0.join(", "))]
    ValidationFailed(Vec<String>),

    #[error("{0} is disabled")]
    FeatureDisabled(&'static str),

    #[error("Store error: {0}")]
    Store(anyhow::Error),

    #[error("Cache error: {0}")]
    Cache(anyhow::Error),

    #[error("Upstream error: {0}")]
    Upstream(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Stable, caller-visible failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidCredentials,
    EmailNotConfirmed,
    CaptchaFailed,
    TwoFactorInvalid,
    StepUpUnavailable,
    PhoneNumberRequired,
    DirectoryNotConfigured,
    DirectoryAuthFailed,
    FederatedNotConfigured,
    FederatedTokenInvalid,
    UserNotRegistered,
    AlreadyRegistered,
    TokenInvalidOrExpired,
    IpMismatch,
    ValidationFailed,
    FeatureDisabled,
    InternalError,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidCredentials
            | ErrorCode::TwoFactorInvalid
            | ErrorCode::DirectoryAuthFailed
            | ErrorCode::FederatedTokenInvalid
            | ErrorCode::TokenInvalidOrExpired => StatusCode::UNAUTHORIZED,
            ErrorCode::EmailNotConfirmed
            | ErrorCode::CaptchaFailed
            | ErrorCode::IpMismatch
            | ErrorCode::DirectoryNotConfigured
            | ErrorCode::FederatedNotConfigured
            | ErrorCode::FeatureDisabled => StatusCode::FORBIDDEN,
            ErrorCode::PhoneNumberRequired | ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorCode::UserNotRegistered => StatusCode::NOT_FOUND,
            ErrorCode::AlreadyRegistered => StatusCode::CONFLICT,
            ErrorCode::StepUpUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ServiceError {
    /// Infrastructure faults that must reach the request layer instead of
    /// being folded into an `AuthResult`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServiceError::Store(_)
                | ServiceError::Cache(_)
                | ServiceError::Upstream(_)
                | ServiceError::Internal(_)
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            // Lockout is reported exactly like a bad password.
            ServiceError::InvalidCredentials | ServiceError::AccountLocked => {
                ErrorCode::InvalidCredentials
            }
            ServiceError::EmailNotConfirmed => ErrorCode::EmailNotConfirmed,
            ServiceError::CaptchaFailed => ErrorCode::CaptchaFailed,
            ServiceError::TwoFactorInvalid => ErrorCode::TwoFactorInvalid,
            ServiceError::StepUpUnavailable => ErrorCode::StepUpUnavailable,
            ServiceError::PhoneNumberRequired => ErrorCode::PhoneNumberRequired,
            ServiceError::DirectoryNotConfigured => ErrorCode::DirectoryNotConfigured,
            ServiceError::DirectoryAuthFailed(_) => ErrorCode::DirectoryAuthFailed,
            ServiceError::FederatedNotConfigured => ErrorCode::FederatedNotConfigured,
            ServiceError::FederatedTokenInvalid => ErrorCode::FederatedTokenInvalid,
            ServiceError::UserNotRegistered => ErrorCode::UserNotRegistered,
            ServiceError::AlreadyRegistered => ErrorCode::AlreadyRegistered,
            ServiceError::TokenInvalidOrExpired => ErrorCode::TokenInvalidOrExpired,
            ServiceError::IpMismatch => ErrorCode::IpMismatch,
            ServiceError::ValidationFailed(_) => ErrorCode::ValidationFailed,
            ServiceError::FeatureDisabled(_) => ErrorCode::FeatureDisabled,
            ServiceError::Store(_)
            | ServiceError::Cache(_)
            | ServiceError::Upstream(_)
            | ServiceError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Message safe to return to the caller. Never names the failing bind,
    /// the distinguished name, or whether the account exists.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::InvalidCredentials | ServiceError::AccountLocked => {
                "Invalid username or password.".to_string()
            }
            ServiceError::EmailNotConfirmed => "Email address has not been confirmed.".to_string(),
            ServiceError::CaptchaFailed => "Captcha verification failed.".to_string(),
            ServiceError::TwoFactorInvalid => "Invalid two-factor code.".to_string(),
            ServiceError::StepUpUnavailable => {
                "Two-factor verification is currently unavailable.".to_string()
            }
            ServiceError::PhoneNumberRequired => {
                "Phone number is required for two-factor authentication.".to_string()
            }
            ServiceError::DirectoryNotConfigured => "Directory login is not configured.".to_string(),
            ServiceError::DirectoryAuthFailed(_) => "Directory authentication failed.".to_string(),
            ServiceError::FederatedNotConfigured => "External login is not enabled.".to_string(),
            ServiceError::FederatedTokenInvalid => "External identity token is invalid.".to_string(),
            ServiceError::UserNotRegistered => {
                "No account is registered for this identity.".to_string()
            }
            ServiceError::AlreadyRegistered => {
                "An account already exists for this identity.".to_string()
            }
            ServiceError::TokenInvalidOrExpired => "Invalid or expired refresh token.".to_string(),
            ServiceError::IpMismatch => {
                "Refresh token was issued to a different client address.".to_string()
            }
            ServiceError::ValidationFailed(messages) => messages.join(", "),
            ServiceError::FeatureDisabled(feature) => format!("{} is disabled.", feature),
            ServiceError::Store(_)
            | ServiceError::Cache(_)
            | ServiceError::Upstream(_)
            | ServiceError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.public_message();
        match err {
            ServiceError::Store(e) => AppError::DatabaseError(e),
            ServiceError::Cache(e) => AppError::CacheError(e),
            ServiceError::Upstream(e) => AppError::BadGateway(e.to_string()),
            ServiceError::Internal(e) => AppError::InternalError(e),
            other => match other.code().status() {
                StatusCode::UNAUTHORIZED => AppError::Unauthorized(anyhow::anyhow!(message)),
                StatusCode::FORBIDDEN => AppError::Forbidden(anyhow::anyhow!(message)),
                StatusCode::NOT_FOUND => AppError::NotFound(anyhow::anyhow!(message)),
                StatusCode::CONFLICT => AppError::Conflict(anyhow::anyhow!(message)),
                StatusCode::SERVICE_UNAVAILABLE => AppError::ServiceUnavailable,
                _ => AppError::BadRequest(anyhow::anyhow!(message)),
            },
        }
    }
}
