use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{RefreshToken, UserSession};

/// Durable storage for refresh tokens and their sessions.
///
/// All lookups are keyed by the refresh token's SHA-256 hex digest.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a refresh token and its session together; neither becomes visible alone.
    async fn insert_issuance(
        &self,
        token: &RefreshToken,
        session: &UserSession,
    ) -> Result<(), anyhow::Error>;

    async fn find_refresh_token(&self, token_hash: &str)
        -> Result<Option<RefreshToken>, anyhow::Error>;

    async fn find_session_by_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<UserSession>, anyhow::Error>;

    /// Compare-and-revoke. Returns `true` only for the call that flipped the flag;
    /// unknown or already-revoked tokens return `false`.
    async fn revoke(&self, token_hash: &str, at: DateTime<Utc>) -> Result<bool, anyhow::Error>;

    /// Compare-and-revoke `old_hash` and persist its replacement as one unit.
    /// `Ok(false)` when `old_hash` is unknown or already revoked; nothing is written then.
    /// On error the old token is left as it was.
    async fn rotate(
        &self,
        old_hash: &str,
        at: DateTime<Utc>,
        token: &RefreshToken,
        session: &UserSession,
    ) -> Result<bool, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_rows(
    conn: &mut PgConnection,
    token: &RefreshToken,
    session: &UserSession,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (token_id, user_id, token_hash, expiry_utc, created_utc,
            is_revoked, created_by_ip)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(token.token_id)
    .bind(token.user_id)
    .bind(&token.token_hash)
    .bind(token.expiry_utc)
    .bind(token.created_utc)
    .bind(token.is_revoked)
    .bind(&token.created_by_ip)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO user_sessions (session_id, user_id, access_token_hash, refresh_token_hash,
            ip_address, created_utc, revoked_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(session.session_id)
    .bind(session.user_id)
    .bind(&session.access_token_hash)
    .bind(&session.refresh_token_hash)
    .bind(&session.ip_address)
    .bind(session.created_utc)
    .bind(session.revoked_utc)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// `true` only for the caller whose update flipped the flag.
async fn revoke_rows(
    conn: &mut PgConnection,
    token_hash: &str,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    // Concurrent revokers serialize on the row lock; only the first sees rows_affected = 1.
    let flipped = sqlx::query(
        "UPDATE refresh_tokens SET is_revoked = TRUE WHERE token_hash = $1 AND is_revoked = FALSE",
    )
    .bind(token_hash)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        == 1;

    if flipped {
        sqlx::query(
            "UPDATE user_sessions SET revoked_utc = $2 WHERE refresh_token_hash = $1 AND revoked_utc IS NULL",
        )
        .bind(token_hash)
        .bind(at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(flipped)
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert_issuance(
        &self,
        token: &RefreshToken,
        session: &UserSession,
    ) -> Result<(), anyhow::Error> {
        let mut tx = self.pool.begin().await?;
        insert_rows(&mut *tx, token, session).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, anyhow::Error> {
        Ok(sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT token_id, user_id, token_hash, expiry_utc, created_utc, is_revoked, created_by_ip
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_session_by_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<UserSession>, anyhow::Error> {
        Ok(sqlx::query_as::<_, UserSession>(
            r#"
            SELECT session_id, user_id, access_token_hash, refresh_token_hash, ip_address,
                created_utc, revoked_utc
            FROM user_sessions
            WHERE refresh_token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn revoke(&self, token_hash: &str, at: DateTime<Utc>) -> Result<bool, anyhow::Error> {
        let mut tx = self.pool.begin().await?;
        let flipped = revoke_rows(&mut *tx, token_hash, at).await?;
        tx.commit().await?;
        Ok(flipped)
    }

    async fn rotate(
        &self,
        old_hash: &str,
        at: DateTime<Utc>,
        token: &RefreshToken,
        session: &UserSession,
    ) -> Result<bool, anyhow::Error> {
        let mut tx = self.pool.begin().await?;

        if !revoke_rows(&mut *tx, old_hash, at).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        // Dropping the transaction on error rolls the revoke back.
        insert_rows(&mut *tx, token, session).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        crate::db::ping(&self.pool).await?;
        Ok(())
    }
}

#[derive(Default)]
struct MockTokenState {
    tokens: HashMap<String, RefreshToken>,
    sessions: HashMap<String, UserSession>,
}

/// In-memory store for tests. One lock covers both maps so paired writes are atomic.
#[derive(Default)]
pub struct MockTokenStore {
    state: Mutex<MockTokenState>,
}

impl MockTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token_count(&self) -> usize {
        self.state.lock().map(|s| s.tokens.len()).unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().map(|s| s.sessions.len()).unwrap_or(0)
    }

    /// Overwrite a stored record, e.g. to age it past expiry.
    pub fn replace_token(&self, token: RefreshToken) -> Result<(), anyhow::Error> {
        self.state
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .tokens
            .insert(token.token_hash.clone(), token);
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MockTokenStore {
    async fn insert_issuance(
        &self,
        token: &RefreshToken,
        session: &UserSession,
    ) -> Result<(), anyhow::Error> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?;

        if state.tokens.contains_key(&token.token_hash) {
            return Err(anyhow::anyhow!("Duplicate refresh token hash"));
        }

        state
            .tokens
            .insert(token.token_hash.clone(), token.clone());
        state
            .sessions
            .insert(session.refresh_token_hash.clone(), session.clone());
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, anyhow::Error> {
        Ok(self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .tokens
            .get(token_hash)
            .cloned())
    }

    async fn find_session_by_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<UserSession>, anyhow::Error> {
        Ok(self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .sessions
            .get(token_hash)
            .cloned())
    }

    async fn revoke(&self, token_hash: &str, at: DateTime<Utc>) -> Result<bool, anyhow::Error> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?;

        let flipped = match state.tokens.get_mut(token_hash) {
            Some(token) if !token.is_revoked => {
                token.is_revoked = true;
                true
            }
            _ => false,
        };

        if flipped {
            if let Some(session) = state.sessions.get_mut(token_hash) {
                session.revoked_utc.get_or_insert(at);
            }
        }

        Ok(flipped)
    }

    async fn rotate(
        &self,
        old_hash: &str,
        at: DateTime<Utc>,
        token: &RefreshToken,
        session: &UserSession,
    ) -> Result<bool, anyhow::Error> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?;

        match state.tokens.get(old_hash) {
            Some(old) if !old.is_revoked => {}
            _ => return Ok(false),
        }
        if state.tokens.contains_key(&token.token_hash) {
            return Err(anyhow::anyhow!("Duplicate refresh token hash"));
        }

        if let Some(old) = state.tokens.get_mut(old_hash) {
            old.is_revoked = true;
        }
        if let Some(old_session) = state.sessions.get_mut(old_hash) {
            old_session.revoked_utc.get_or_insert(at);
        }
        state
            .tokens
            .insert(token.token_hash.clone(), token.clone());
        state
            .sessions
            .insert(session.refresh_token_hash.clone(), session.clone());
        Ok(true)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
