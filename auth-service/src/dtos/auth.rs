use serde::{Deserialize, Serialize};
use service_core::axum::http::StatusCode;
use uuid::Uuid;
use validator::Validate;

use crate::services::{AccessTokenClaims, ErrorCode, ServiceError, TokenPair};

/// Uniform outcome of every login, refresh and registration operation.
///
/// Exactly one of `tokens`, `step_up_required` or `error_code` describes the
/// outcome; registration success carries none of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenPair>,
    #[serde(default)]
    pub step_up_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masked_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuthResult {
    fn empty(success: bool) -> Self {
        Self {
            success,
            tokens: None,
            step_up_required: false,
            masked_phone: None,
            user_id: None,
            error_code: None,
            error_message: None,
        }
    }

    pub fn authenticated(tokens: TokenPair) -> Self {
        Self {
            tokens: Some(tokens),
            ..Self::empty(true)
        }
    }

    pub fn step_up(masked_phone: String) -> Self {
        Self {
            step_up_required: true,
            masked_phone: Some(masked_phone),
            ..Self::empty(true)
        }
    }

    pub fn registered(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::empty(true)
        }
    }

    pub fn failed(error: &ServiceError) -> Self {
        Self {
            error_code: Some(error.code()),
            error_message: Some(error.public_message()),
            ..Self::empty(false)
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.error_code {
            Some(code) => code.status(),
            None => StatusCode::OK,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 256, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, max = 1024, message = "Password is required"))]
    pub password: String,

    pub captcha: Option<String>,

    pub two_factor_code: Option<String>,

    pub ip_address: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GoogleLoginRequest {
    #[validate(length(min = 1, message = "Access token is required"))]
    pub access_token: String,

    pub captcha: Option<String>,

    pub two_factor_code: Option<String>,

    pub ip_address: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TwoFactorRequest {
    #[validate(length(min = 1, max = 256, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, max = 16, message = "Code is required"))]
    pub code: String,

    pub ip_address: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,

    pub ip_address: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RevokeRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeResponse {
    /// `false` when the token was unknown or already revoked.
    pub revoked: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IntrospectRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IntrospectResponse {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl IntrospectResponse {
    pub fn inactive() -> Self {
        Self {
            active: false,
            sub: None,
            username: None,
            roles: Vec::new(),
            exp: None,
            iss: None,
        }
    }
}

impl From<AccessTokenClaims> for IntrospectResponse {
    fn from(claims: AccessTokenClaims) -> Self {
        Self {
            active: true,
            sub: Some(claims.sub),
            username: Some(claims.name),
            roles: claims.roles,
            exp: Some(claims.exp),
            iss: Some(claims.iss),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 256, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, max = 1024, message = "Password is required"))]
    pub password: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(min = 4, max = 32, message = "Invalid phone number"))]
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GoogleRegisterRequest {
    #[validate(length(min = 1, message = "Access token is required"))]
    pub access_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PhoneRegisterRequest {
    #[validate(length(min = 4, max = 32, message = "Invalid phone number"))]
    pub phone_number: String,

    #[validate(length(min = 1, max = 16, message = "Code is required"))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StepUpSendRequest {
    #[validate(length(min = 4, max = 32, message = "Invalid phone number"))]
    pub phone_number: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StepUpSendResponse {
    pub masked_phone: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub token_store: String,
    pub cache: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_code_and_generic_message() {
        let result = AuthResult::failed(&ServiceError::AccountLocked);

        assert!(!result.success);
        assert_eq!(result.error_code, Some(ErrorCode::InvalidCredentials));
        assert_eq!(result.status(), StatusCode::UNAUTHORIZED);
        assert!(result.tokens.is_none());
    }

    #[test]
    fn step_up_is_success_without_tokens() -> Result<(), serde_json::Error> {
        let result = AuthResult::step_up("******4567".to_string());
        let json = serde_json::to_value(&result)?;

        assert_eq!(result.status(), StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["step_up_required"], true);
        assert_eq!(json["masked_phone"], "******4567");
        assert!(json.get("tokens").is_none());
        assert!(json.get("error_code").is_none());
        Ok(())
    }

    #[test]
    fn register_request_rejects_bad_email() {
        let request = RegisterRequest {
            username: "alice".to_string(),
            password: "Secret123".to_string(),
            email: Some("not-an-email".to_string()),
            phone_number: None,
        };
        assert!(request.validate().is_err());
    }
}
