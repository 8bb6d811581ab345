//! Refresh-token rotation and revocation.

use serde_json::json;
use std::sync::Arc;

use crate::dtos::AuthResult;
use crate::models::{AuditEvent, AuditEventType};
use crate::services::{AuditSink, ServiceError, TokenService, UserDirectory};

#[derive(Clone)]
pub struct RefreshOrchestrator {
    tokens: TokenService,
    users: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditSink>,
    ip_lock_enabled: bool,
}

impl RefreshOrchestrator {
    pub fn new(
        tokens: TokenService,
        users: Arc<dyn UserDirectory>,
        audit: Arc<dyn AuditSink>,
        ip_lock_enabled: bool,
    ) -> Self {
        Self {
            tokens,
            users,
            audit,
            ip_lock_enabled,
        }
    }

    /// Exchange a refresh token for a new pair. Each refresh token is single-use:
    /// of several concurrent presentations exactly one succeeds.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client_ip: &str,
    ) -> Result<AuthResult, ServiceError> {
        match self.rotate(refresh_token, client_ip).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, "Refresh aborted");
                Err(e)
            }
            Err(e) => {
                tracing::info!(client_ip = %client_ip, reason = %e, "Refresh rejected");
                self.audit.record(
                    AuditEvent::new(AuditEventType::RefreshRejected)
                        .with_ip(client_ip)
                        .with_data(json!({ "error_code": e.code() })),
                );
                Ok(AuthResult::failed(&e))
            }
        }
    }

    async fn rotate(
        &self,
        refresh_token: &str,
        client_ip: &str,
    ) -> Result<AuthResult, ServiceError> {
        let record = self
            .tokens
            .lookup_refresh_token(refresh_token)
            .await?
            .filter(|r| r.is_active())
            .ok_or(ServiceError::TokenInvalidOrExpired)?;

        // A mismatch leaves the token untouched so the rightful client can still use it.
        if self.ip_lock_enabled && record.created_by_ip != client_ip {
            tracing::warn!(
                user_id = %record.user_id,
                issued_to = %record.created_by_ip,
                client_ip = %client_ip,
                "Refresh token presented from a different address"
            );
            return Err(ServiceError::IpMismatch);
        }

        let user = self
            .users
            .find_by_id(record.user_id)
            .await
            .map_err(ServiceError::Store)?
            .ok_or(ServiceError::TokenInvalidOrExpired)?;

        // None: a concurrent refresh of the same token won the race.
        let tokens = self
            .tokens
            .rotate_token_pair(refresh_token, &user, &user.roles, client_ip)
            .await?
            .ok_or(ServiceError::TokenInvalidOrExpired)?;

        tracing::info!(user_id = %user.user_id, client_ip = %client_ip, "Refresh token rotated");
        self.audit.record(
            AuditEvent::new(AuditEventType::TokenRefreshed)
                .with_user(user.user_id)
                .with_username(user.username.as_str())
                .with_ip(client_ip),
        );

        Ok(AuthResult::authenticated(tokens))
    }

    /// Logout. Idempotent; `false` when the token was unknown or already revoked.
    pub async fn revoke(&self, refresh_token: &str, client_ip: &str) -> Result<bool, ServiceError> {
        let record = self.tokens.lookup_refresh_token(refresh_token).await?;
        let revoked = self.tokens.revoke(refresh_token).await?;

        if revoked {
            let mut event = AuditEvent::new(AuditEventType::TokenRevoked).with_ip(client_ip);
            if let Some(record) = record {
                event = event.with_user(record.user_id);
            }
            self.audit.record(event);
        }

        Ok(revoked)
    }
}
