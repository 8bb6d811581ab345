//! Session model - one row per token issuance.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::RefreshToken;

/// Session entity, linked to its refresh token by hash.
#[derive(Debug, Clone, FromRow)]
pub struct UserSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub access_token_hash: String,
    pub refresh_token_hash: String,
    pub ip_address: String,
    pub created_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
}

impl UserSession {
    /// Create the session paired with `refresh_token`.
    pub fn for_issuance(refresh_token: &RefreshToken, access_token: &str) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: refresh_token.user_id,
            access_token_hash: RefreshToken::hash_token(access_token),
            refresh_token_hash: refresh_token.token_hash.clone(),
            ip_address: refresh_token.created_by_ip.clone(),
            created_utc: refresh_token.created_utc,
            revoked_utc: None,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }
}
