//! Federated identity lookups against Google's userinfo endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::GoogleConfig;
use crate::services::ServiceError;

/// Identity asserted by a federated provider for a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the identity behind `access_token`.
    ///
    /// A rejected or unusable token is `FederatedTokenInvalid`; a provider
    /// that cannot be reached is `Upstream`.
    async fn user_info(&self, access_token: &str) -> Result<FederatedIdentity, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    email: Option<String>,
    #[serde(default)]
    verified_email: bool,
    name: Option<String>,
}

#[derive(Clone)]
pub struct GoogleIdentityProvider {
    client: reqwest::Client,
    userinfo_url: String,
}

impl GoogleIdentityProvider {
    pub fn new(config: &GoogleConfig) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            userinfo_url: config.userinfo_url.clone(),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    async fn user_info(&self, access_token: &str) -> Result<FederatedIdentity, ServiceError> {
        if access_token.trim().is_empty() {
            return Err(ServiceError::FederatedTokenInvalid);
        }

        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Identity provider unreachable");
                ServiceError::Upstream(anyhow::anyhow!("Identity provider request failed: {}", e))
            })?;

        let status = response.status();
        if status.is_server_error() {
            tracing::error!(status = %status, "Identity provider error");
            return Err(ServiceError::Upstream(anyhow::anyhow!(
                "Identity provider returned {}",
                status
            )));
        }
        if !status.is_success() {
            tracing::info!(status = %status, "Federated token rejected by provider");
            return Err(ServiceError::FederatedTokenInvalid);
        }

        let body: UserInfoResponse = response.json().await.map_err(|e| {
            tracing::warn!(error = %e, "Unparsable userinfo response");
            ServiceError::FederatedTokenInvalid
        })?;

        let email = body
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or(ServiceError::FederatedTokenInvalid)?;

        Ok(FederatedIdentity {
            email,
            email_verified: body.verified_email,
            name: body.name,
        })
    }
}

/// Maps fixed bearer tokens to identities.
#[derive(Default)]
pub struct MockIdentityProvider {
    identities: Mutex<HashMap<String, FederatedIdentity>>,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(self, access_token: &str, email: &str) -> Self {
        if let Ok(mut identities) = self.identities.lock() {
            identities.insert(
                access_token.to_string(),
                FederatedIdentity {
                    email: email.to_string(),
                    email_verified: true,
                    name: None,
                },
            );
        }
        self
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn user_info(&self, access_token: &str) -> Result<FederatedIdentity, ServiceError> {
        self.identities
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Lock poisoned: {}", e)))?
            .get(access_token)
            .cloned()
            .ok_or(ServiceError::FederatedTokenInvalid)
    }
}
