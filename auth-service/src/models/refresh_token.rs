use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh token record. Only the SHA-256 digest of the opaque value is stored.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub token_id: Uuid,

    /// User this token belongs to
    pub user_id: Uuid,

    /// Hex SHA-256 of the opaque token string
    pub token_hash: String,

    pub expiry_utc: DateTime<Utc>,

    pub created_utc: DateTime<Utc>,

    /// Permanent once set
    pub is_revoked: bool,

    /// Client address the token was issued to
    pub created_by_ip: String,
}

impl RefreshToken {
    /// Create a new refresh token record
    pub fn new(user_id: Uuid, token: &str, expiry_minutes: i64, ip_address: String) -> Self {
        let now = Utc::now();

        Self {
            token_id: Uuid::new_v4(),
            user_id,
            token_hash: Self::hash_token(token),
            expiry_utc: now + Duration::minutes(expiry_minutes),
            created_utc: now,
            is_revoked: false,
            created_by_ip: ip_address,
        }
    }

    /// Hash a token using SHA-256
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiry_utc
    }

    /// Not expired and not revoked
    pub fn is_active(&self) -> bool {
        !self.is_expired() && !self.is_revoked
    }
}
