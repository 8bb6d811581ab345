use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::models::{RefreshToken, User, UserSession};
use crate::services::{ServiceError, TokenStore};

const REFRESH_TOKEN_BYTES: usize = 32;

/// Claims carried by access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Username
    pub name: String,
    /// JWT ID, unique per token (for future denylisting)
    pub jti: String,
    pub iss: String,
    pub aud: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

/// Token pair returned to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub access_token_expires_utc: DateTime<Utc>,
    pub refresh_token_expires_utc: DateTime<Utc>,
}

/// A freshly minted pair and the rows that make it durable.
struct Issuance {
    pair: TokenPair,
    record: RefreshToken,
    session: UserSession,
}

/// Issues signed access tokens and opaque refresh tokens, and owns their persistence.
#[derive(Clone)]
pub struct TokenService {
    config: Arc<TokenConfig>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    store: Arc<dyn TokenStore>,
}

impl TokenService {
    pub fn new(config: Arc<TokenConfig>, store: Arc<dyn TokenStore>) -> Self {
        let secret = config.signing_key.expose_secret().as_bytes();
        let encoding_key = EncodingKey::from_secret(secret);
        let decoding_key = DecodingKey::from_secret(secret);

        tracing::info!(issuer = %config.issuer, audience = %config.audience, "Token service initialized with HS256 key");

        Self {
            config,
            encoding_key,
            decoding_key,
            store,
        }
    }

    /// Sign an access token, mint a refresh token, and persist the refresh
    /// token together with its session. Nothing is returned unless both
    /// records were written.
    pub async fn issue_token_pair(
        &self,
        user: &User,
        roles: &[String],
        ip_address: &str,
    ) -> Result<TokenPair, ServiceError> {
        let issuance = self.mint(user, roles, ip_address)?;

        self.store
            .insert_issuance(&issuance.record, &issuance.session)
            .await
            .map_err(ServiceError::Store)?;

        tracing::debug!(user_id = %user.user_id, "Issued token pair");
        Ok(issuance.pair)
    }

    /// Retire `refresh_token` and issue its replacement in one store write.
    ///
    /// `Ok(None)` when the token was already revoked or unknown, including
    /// when a concurrent rotation got there first.
    pub async fn rotate_token_pair(
        &self,
        refresh_token: &str,
        user: &User,
        roles: &[String],
        ip_address: &str,
    ) -> Result<Option<TokenPair>, ServiceError> {
        let issuance = self.mint(user, roles, ip_address)?;

        let rotated = self
            .store
            .rotate(
                &RefreshToken::hash_token(refresh_token),
                Utc::now(),
                &issuance.record,
                &issuance.session,
            )
            .await
            .map_err(ServiceError::Store)?;

        Ok(rotated.then_some(issuance.pair))
    }

    fn mint(&self, user: &User, roles: &[String], ip_address: &str) -> Result<Issuance, ServiceError> {
        let now = Utc::now();
        let access_expires = now + Duration::minutes(self.config.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user.user_id.to_string(),
            name: user.username.clone(),
            jti: Uuid::new_v4().to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            exp: access_expires.timestamp(),
            iat: now.timestamp(),
            roles: roles.to_vec(),
        };
        let access_token = self.sign(&claims)?;

        let refresh_token = generate_refresh_token();
        let record = RefreshToken::new(
            user.user_id,
            &refresh_token,
            self.config.refresh_token_expiry_minutes,
            ip_address.to_string(),
        );
        let session = UserSession::for_issuance(&record, &access_token);

        let pair = TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry_seconds(),
            access_token_expires_utc: access_expires,
            refresh_token_expires_utc: record.expiry_utc,
        };

        Ok(Issuance {
            pair,
            record,
            session,
        })
    }

    /// Verify signature, issuer, audience and expiry (no leeway).
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.leeway = 0;

        decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                ServiceError::TokenInvalidOrExpired
            })
    }

    pub async fn lookup_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<RefreshToken>, ServiceError> {
        self.store
            .find_refresh_token(&RefreshToken::hash_token(refresh_token))
            .await
            .map_err(ServiceError::Store)
    }

    pub async fn lookup_session_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<UserSession>, ServiceError> {
        self.store
            .find_session_by_refresh_token(&RefreshToken::hash_token(refresh_token))
            .await
            .map_err(ServiceError::Store)
    }

    /// Revoke a refresh token and close its session.
    ///
    /// Idempotent: returns `Ok(false)` when the token was unknown or already revoked.
    pub async fn revoke(&self, refresh_token: &str) -> Result<bool, ServiceError> {
        self.store
            .revoke(&RefreshToken::hash_token(refresh_token), Utc::now())
            .await
            .map_err(ServiceError::Store)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.config.access_token_expiry_minutes * 60
    }

    pub async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.store.health_check().await
    }

    fn sign(&self, claims: &AccessTokenClaims) -> Result<String, ServiceError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode access token: {}", e)))
    }
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::services::MockTokenStore;
    use secrecy::Secret;

    fn config(key: &str, issuer: &str) -> Arc<TokenConfig> {
        Arc::new(TokenConfig {
            signing_key: Secret::new(key.to_string()),
            issuer: issuer.to_string(),
            audience: "test-audience".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_minutes: 60,
        })
    }

    fn service(store: Arc<MockTokenStore>) -> TokenService {
        TokenService::new(config(&"a".repeat(32), "test-issuer"), store)
    }

    fn user() -> User {
        User::from_new(
            &NewUser {
                username: "alice".to_string(),
                email: None,
                phone_number: None,
                password: None,
                email_confirmed: true,
                roles: vec![],
            },
            None,
        )
    }

    #[tokio::test]
    async fn issued_token_validates_to_same_subject() -> Result<(), anyhow::Error> {
        let store = Arc::new(MockTokenStore::new());
        let tokens = service(store.clone());
        let user = user();

        let pair = tokens
            .issue_token_pair(&user, &["admin".to_string()], "10.0.0.1")
            .await?;
        let claims = tokens.validate_access_token(&pair.access_token)?;

        assert_eq!(claims.sub, user.user_id.to_string());
        assert_eq!(claims.name, "alice");
        assert_eq!(claims.roles, vec!["admin".to_string()]);
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 15 * 60);
        Ok(())
    }

    #[tokio::test]
    async fn issuance_persists_token_and_session_with_ip() -> Result<(), anyhow::Error> {
        let store = Arc::new(MockTokenStore::new());
        let tokens = service(store.clone());
        let user = user();

        let pair = tokens.issue_token_pair(&user, &[], "203.0.113.5").await?;

        let record = tokens
            .lookup_refresh_token(&pair.refresh_token)
            .await?
            .ok_or_else(|| anyhow::anyhow!("refresh token not persisted"))?;
        let session = tokens
            .lookup_session_by_refresh_token(&pair.refresh_token)
            .await?
            .ok_or_else(|| anyhow::anyhow!("session not persisted"))?;

        assert_eq!(record.user_id, user.user_id);
        assert_eq!(record.created_by_ip, "203.0.113.5");
        assert_ne!(record.token_hash, pair.refresh_token);
        assert_eq!(session.ip_address, "203.0.113.5");
        assert_eq!(store.token_count(), 1);
        assert_eq!(store.session_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn each_issuance_has_unique_identifiers() -> Result<(), anyhow::Error> {
        let tokens = service(Arc::new(MockTokenStore::new()));
        let user = user();

        let a = tokens.issue_token_pair(&user, &[], "ip").await?;
        let b = tokens.issue_token_pair(&user, &[], "ip").await?;

        assert_ne!(a.refresh_token, b.refresh_token);
        let jti_a = tokens.validate_access_token(&a.access_token)?.jti;
        let jti_b = tokens.validate_access_token(&b.access_token)?.jti;
        assert_ne!(jti_a, jti_b);
        Ok(())
    }

    #[test]
    fn expired_token_fails_validation() -> Result<(), anyhow::Error> {
        let tokens = service(Arc::new(MockTokenStore::new()));
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: Uuid::new_v4().to_string(),
            name: "alice".to_string(),
            jti: Uuid::new_v4().to_string(),
            iss: "test-issuer".to_string(),
            aud: "test-audience".to_string(),
            exp: (now - Duration::seconds(1)).timestamp(),
            iat: (now - Duration::minutes(16)).timestamp(),
            roles: vec![],
        };
        let token = tokens.sign(&claims)?;

        assert!(matches!(
            tokens.validate_access_token(&token),
            Err(ServiceError::TokenInvalidOrExpired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn token_from_other_key_or_issuer_is_rejected() -> Result<(), anyhow::Error> {
        let user = user();
        let ours = service(Arc::new(MockTokenStore::new()));
        let other_key = TokenService::new(
            config(&"b".repeat(32), "test-issuer"),
            Arc::new(MockTokenStore::new()),
        );
        let other_issuer = TokenService::new(
            config(&"a".repeat(32), "someone-else"),
            Arc::new(MockTokenStore::new()),
        );

        let forged = other_key.issue_token_pair(&user, &[], "ip").await?;
        let foreign = other_issuer.issue_token_pair(&user, &[], "ip").await?;

        assert!(ours.validate_access_token(&forged.access_token).is_err());
        assert!(ours.validate_access_token(&foreign.access_token).is_err());
        assert!(ours.validate_access_token("not-a-jwt").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_closes_session() -> Result<(), anyhow::Error> {
        let tokens = service(Arc::new(MockTokenStore::new()));
        let pair = tokens.issue_token_pair(&user(), &[], "ip").await?;

        assert!(tokens.revoke(&pair.refresh_token).await?);
        assert!(!tokens.revoke(&pair.refresh_token).await?);
        assert!(!tokens.revoke("never-issued").await?);

        let record = tokens
            .lookup_refresh_token(&pair.refresh_token)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing record"))?;
        let session = tokens
            .lookup_session_by_refresh_token(&pair.refresh_token)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing session"))?;
        assert!(record.is_revoked);
        assert!(session.is_revoked());
        Ok(())
    }

    #[tokio::test]
    async fn rotation_replaces_the_token_exactly_once() -> Result<(), anyhow::Error> {
        let store = Arc::new(MockTokenStore::new());
        let tokens = service(store.clone());
        let user = user();
        let original = tokens.issue_token_pair(&user, &[], "ip").await?;

        let rotated = tokens
            .rotate_token_pair(&original.refresh_token, &user, &[], "ip")
            .await?
            .ok_or_else(|| anyhow::anyhow!("first rotation should succeed"))?;
        let replay = tokens
            .rotate_token_pair(&original.refresh_token, &user, &[], "ip")
            .await?;

        assert!(replay.is_none());
        assert_eq!(store.token_count(), 2);
        let record = tokens
            .lookup_refresh_token(&rotated.refresh_token)
            .await?
            .ok_or_else(|| anyhow::anyhow!("rotated token not persisted"))?;
        assert!(record.is_active());
        Ok(())
    }

    #[test]
    fn refresh_tokens_are_url_safe() {
        let token = generate_refresh_token();
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
