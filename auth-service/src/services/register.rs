//! Account creation. Registration never issues tokens.

use serde_json::json;
use std::sync::Arc;

use crate::dtos::AuthResult;
use crate::models::{AuditEvent, AuditEventType, NewUser, User};
use crate::services::{
    AuditSink, Capability, CodePurpose, FederatedVerifier, ServiceError, StepUpService, UserDirectory,
};
use crate::utils::{mask_phone, Password};

/// Fields accepted by manual registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub password: Password,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Clone)]
pub struct RegistrationOrchestrator {
    users: Arc<dyn UserDirectory>,
    federated: Capability<FederatedVerifier>,
    phone: Capability<StepUpService>,
    audit: Arc<dyn AuditSink>,
}

impl RegistrationOrchestrator {
    pub fn new(users: Arc<dyn UserDirectory>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            users,
            federated: Capability::Disabled,
            phone: Capability::Disabled,
            audit,
        }
    }

    pub fn with_federated(mut self, federated: Capability<FederatedVerifier>) -> Self {
        self.federated = federated;
        self
    }

    /// Codes sent through this orchestrator are scoped to phone verification
    /// and never satisfy a login challenge.
    pub fn with_phone(mut self, phone: Capability<StepUpService>) -> Self {
        self.phone = phone.map(|s| s.with_purpose(CodePurpose::PhoneVerification));
        self
    }

    pub async fn register(
        &self,
        registration: Registration,
        client_ip: &str,
    ) -> Result<AuthResult, ServiceError> {
        let outcome = self
            .users
            .create_user(NewUser {
                username: registration.username,
                email: registration.email.filter(|e| !e.trim().is_empty()),
                phone_number: registration.phone_number.filter(|p| !p.trim().is_empty()),
                password: Some(registration.password),
                email_confirmed: false,
                roles: Vec::new(),
            })
            .await;
        self.settle("manual", client_ip, outcome)
    }

    /// Creates a password-less account for the provider-asserted email.
    pub async fn register_with_federated(
        &self,
        access_token: &str,
        client_ip: &str,
    ) -> Result<AuthResult, ServiceError> {
        let outcome = self.create_federated(access_token).await;
        self.settle("federated", client_ip, outcome)
    }

    async fn create_federated(&self, access_token: &str) -> Result<User, ServiceError> {
        let federated = self
            .federated
            .enabled()
            .ok_or(ServiceError::FederatedNotConfigured)?;

        let identity = federated.identity(access_token).await?;
        if federated.find_local(&identity).await?.is_some() {
            return Err(ServiceError::AlreadyRegistered);
        }

        self.users.create_user(NewUser {
            username: identity.email.clone(),
            email: Some(identity.email),
            phone_number: None,
            password: None,
            email_confirmed: identity.email_verified,
            roles: Vec::new(),
        })
        .await
    }

    /// Requires a code previously sent to `phone_number` through
    /// [`request_phone_code`](Self::request_phone_code).
    pub async fn register_with_phone(
        &self,
        phone_number: &str,
        code: &str,
        client_ip: &str,
    ) -> Result<AuthResult, ServiceError> {
        let outcome = self.create_with_phone(phone_number.trim(), code).await;
        self.settle("phone", client_ip, outcome)
    }

    async fn create_with_phone(&self, phone_number: &str, code: &str) -> Result<User, ServiceError> {
        let step_up = self
            .phone
            .enabled()
            .ok_or(ServiceError::FeatureDisabled("Phone registration"))?;

        if !step_up.verify_code(phone_number, code).await? {
            return Err(ServiceError::TwoFactorInvalid);
        }

        self.users.create_user(NewUser {
            username: phone_number.to_string(),
            email: None,
            phone_number: Some(phone_number.to_string()),
            password: None,
            email_confirmed: false,
            roles: Vec::new(),
        })
        .await
    }

    /// Send a verification code ahead of phone registration. Returns the masked number.
    pub async fn request_phone_code(&self, phone_number: &str) -> Result<String, ServiceError> {
        let step_up = self
            .phone
            .enabled()
            .ok_or(ServiceError::FeatureDisabled("Phone registration"))?;

        let phone_number = phone_number.trim();
        step_up.request_code(phone_number).await?;
        Ok(mask_phone(phone_number))
    }

    pub fn phone_code_ttl_seconds(&self) -> Option<u64> {
        self.phone.enabled().map(|s| s.code_ttl().as_secs())
    }

    fn settle(
        &self,
        path: &'static str,
        client_ip: &str,
        outcome: Result<User, ServiceError>,
    ) -> Result<AuthResult, ServiceError> {
        match outcome {
            Ok(user) => {
                tracing::info!(user_id = %user.user_id, path, "User registered");
                self.audit.record(
                    AuditEvent::new(AuditEventType::UserRegistered)
                        .with_user(user.user_id)
                        .with_username(user.username.as_str())
                        .with_ip(client_ip)
                        .with_data(json!({ "path": path })),
                );
                Ok(AuthResult::registered(user.user_id))
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(path, error = %e, "Registration aborted");
                Err(e)
            }
            Err(e) => {
                tracing::info!(path, reason = %e, "Registration rejected");
                self.audit.record(
                    AuditEvent::new(AuditEventType::RegistrationRejected)
                        .with_ip(client_ip)
                        .with_data(json!({ "path": path, "error_code": e.code() })),
                );
                Ok(AuthResult::failed(&e))
            }
        }
    }
}
