//! Identity verifiers. Each proves who the caller is and resolves the local
//! user; none of them issues tokens.

use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;

use crate::config::LdapConfig;
use crate::models::User;
use crate::services::{
    BindOutcome, DirectoryConnection, DirectoryConnector, DirectoryFailure, FederatedIdentity,
    IdentityProvider, PasswordCheck, ServiceError, UserDirectory,
};
use crate::utils::Password;

/// Username and password against the local user directory.
#[derive(Clone)]
pub struct CredentialVerifier {
    users: Arc<dyn UserDirectory>,
}

impl CredentialVerifier {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }

    pub async fn verify(&self, username: &str, password: &Password) -> Result<User, ServiceError> {
        let user = self
            .users
            .find_by_username(username)
            .await
            .map_err(ServiceError::Store)?
            .ok_or(ServiceError::InvalidCredentials)?;

        match self
            .users
            .verify_password(&user, password)
            .await
            .map_err(ServiceError::Store)?
        {
            PasswordCheck::Valid => Ok(user),
            PasswordCheck::Invalid => Err(ServiceError::InvalidCredentials),
            PasswordCheck::LockedOut => {
                tracing::info!(user_id = %user.user_id, "Login refused for locked account");
                Err(ServiceError::AccountLocked)
            }
        }
    }
}

/// Service bind followed by a user bind against an external directory.
#[derive(Clone)]
pub struct DirectoryVerifier {
    connector: Arc<dyn DirectoryConnector>,
    users: Arc<dyn UserDirectory>,
    base_dn: String,
    bind_dn: String,
    bind_password: Secret<String>,
}

impl DirectoryVerifier {
    pub fn new(
        connector: Arc<dyn DirectoryConnector>,
        users: Arc<dyn UserDirectory>,
        config: &LdapConfig,
    ) -> Self {
        Self {
            connector,
            users,
            base_dn: config.base_dn.clone(),
            bind_dn: config.bind_dn.clone(),
            bind_password: config.bind_password.clone(),
        }
    }

    pub fn user_dn(&self, username: &str) -> String {
        format!("uid={},{}", ldap3::dn_escape(username), self.base_dn)
    }

    /// The directory proves identity; the local directory must still hold
    /// an account with the same username.
    pub async fn verify(&self, username: &str, password: &Password) -> Result<User, ServiceError> {
        // A simple bind with an empty password is an unauthenticated bind and succeeds.
        if username.trim().is_empty() || password.is_empty() {
            return Err(ServiceError::DirectoryAuthFailed(
                DirectoryFailure::UserBindRejected,
            ));
        }

        let mut conn = self.connector.connect().await.map_err(|e| {
            tracing::error!(error = %e, "Directory unreachable");
            ServiceError::DirectoryAuthFailed(DirectoryFailure::Unreachable)
        })?;

        let outcome = self.bind_pair(conn.as_mut(), username, password).await;
        conn.close().await;

        if let Err(failure) = outcome {
            match failure {
                DirectoryFailure::Unreachable => {
                    tracing::error!(reason = %failure, "Directory bind aborted")
                }
                DirectoryFailure::ServiceBindRejected => {
                    tracing::error!(reason = %failure, "Directory service account rejected")
                }
                DirectoryFailure::UserBindRejected => {
                    tracing::info!(username = %username, reason = %failure, "Directory login rejected")
                }
            }
            return Err(ServiceError::DirectoryAuthFailed(failure));
        }

        self.users
            .find_by_username(username)
            .await
            .map_err(ServiceError::Store)?
            .ok_or_else(|| {
                tracing::info!(username = %username, "Directory user has no local account");
                ServiceError::InvalidCredentials
            })
    }

    async fn bind_pair(
        &self,
        conn: &mut dyn DirectoryConnection,
        username: &str,
        password: &Password,
    ) -> Result<(), DirectoryFailure> {
        match conn
            .bind(&self.bind_dn, self.bind_password.expose_secret())
            .await
        {
            Ok(BindOutcome::Accepted) => {}
            Ok(BindOutcome::Rejected) => return Err(DirectoryFailure::ServiceBindRejected),
            Err(e) => {
                tracing::warn!(error = %e, "Service bind failed");
                return Err(DirectoryFailure::Unreachable);
            }
        }

        match conn.bind(&self.user_dn(username), password.as_str()).await {
            Ok(BindOutcome::Accepted) => Ok(()),
            Ok(BindOutcome::Rejected) => Err(DirectoryFailure::UserBindRejected),
            Err(e) => {
                tracing::warn!(error = %e, "User bind failed");
                Err(DirectoryFailure::Unreachable)
            }
        }
    }
}

/// Bearer token from a federated provider, resolved to a local account by email.
#[derive(Clone)]
pub struct FederatedVerifier {
    provider: Arc<dyn IdentityProvider>,
    users: Arc<dyn UserDirectory>,
}

impl FederatedVerifier {
    pub fn new(provider: Arc<dyn IdentityProvider>, users: Arc<dyn UserDirectory>) -> Self {
        Self { provider, users }
    }

    pub async fn identity(&self, access_token: &str) -> Result<FederatedIdentity, ServiceError> {
        self.provider.user_info(access_token).await
    }

    /// Never creates an account.
    pub async fn verify(&self, access_token: &str) -> Result<User, ServiceError> {
        let identity = self.identity(access_token).await?;
        self.find_local(&identity)
            .await?
            .ok_or(ServiceError::UserNotRegistered)
    }

    pub async fn find_local(&self, identity: &FederatedIdentity) -> Result<Option<User>, ServiceError> {
        self.users
            .find_by_email(&identity.email)
            .await
            .map_err(ServiceError::Store)
    }
}
