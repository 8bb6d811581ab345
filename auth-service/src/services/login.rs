//! Login state machine: captcha, verification, step-up, token issuance.

use serde_json::json;
use std::future::Future;
use std::sync::Arc;

use crate::dtos::AuthResult;
use crate::models::{AuditEvent, AuditEventType, User};
use crate::services::{
    AuditSink, Capability, CaptchaVerifier, CodePurpose, CredentialVerifier, DirectoryVerifier,
    FederatedVerifier, ServiceError, StepUpService, TokenService, UserDirectory,
};
use crate::utils::{mask_phone, Password};

/// Per-request inputs shared by every login entry point.
#[derive(Debug, Clone, Copy)]
pub struct LoginAttempt<'a> {
    pub captcha: Option<&'a str>,
    pub two_factor_code: Option<&'a str>,
    pub client_ip: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginMethod {
    Password,
    Directory,
    Federated,
    TwoFactor,
}

impl LoginMethod {
    fn as_str(&self) -> &'static str {
        match self {
            LoginMethod::Password => "password",
            LoginMethod::Directory => "directory",
            LoginMethod::Federated => "federated",
            LoginMethod::TwoFactor => "two_factor",
        }
    }

    /// Federated identities arrive with a provider-asserted email.
    fn checks_email(&self) -> bool {
        matches!(self, LoginMethod::Password | LoginMethod::Directory)
    }
}

#[derive(Clone)]
pub struct LoginOrchestrator {
    credentials: CredentialVerifier,
    directory: Capability<DirectoryVerifier>,
    federated: Capability<FederatedVerifier>,
    captcha: Capability<Arc<dyn CaptchaVerifier>>,
    step_up: Capability<StepUpService>,
    users: Arc<dyn UserDirectory>,
    tokens: TokenService,
    audit: Arc<dyn AuditSink>,
    email_verification_required: bool,
}

impl LoginOrchestrator {
    /// Password login only; other capabilities start disabled.
    pub fn new(
        users: Arc<dyn UserDirectory>,
        tokens: TokenService,
        audit: Arc<dyn AuditSink>,
        email_verification_required: bool,
    ) -> Self {
        Self {
            credentials: CredentialVerifier::new(users.clone()),
            directory: Capability::Disabled,
            federated: Capability::Disabled,
            captcha: Capability::Disabled,
            step_up: Capability::Disabled,
            users,
            tokens,
            audit,
            email_verification_required,
        }
    }

    pub fn with_directory(mut self, directory: Capability<DirectoryVerifier>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_federated(mut self, federated: Capability<FederatedVerifier>) -> Self {
        self.federated = federated;
        self
    }

    pub fn with_captcha(mut self, captcha: Capability<Arc<dyn CaptchaVerifier>>) -> Self {
        self.captcha = captcha;
        self
    }

    pub fn with_step_up(mut self, step_up: Capability<StepUpService>) -> Self {
        self.step_up = step_up.map(|s| s.with_purpose(CodePurpose::Login));
        self
    }

    pub async fn login_with_password(
        &self,
        username: &str,
        password: &Password,
        attempt: LoginAttempt<'_>,
    ) -> Result<AuthResult, ServiceError> {
        let outcome = self
            .run(
                LoginMethod::Password,
                attempt,
                self.credentials.verify(username, password),
            )
            .await;
        self.settle(LoginMethod::Password, username, attempt.client_ip, outcome)
    }

    pub async fn login_with_directory(
        &self,
        username: &str,
        password: &Password,
        attempt: LoginAttempt<'_>,
    ) -> Result<AuthResult, ServiceError> {
        let outcome = match self.directory.enabled() {
            Some(directory) => {
                self.run(
                    LoginMethod::Directory,
                    attempt,
                    directory.verify(username, password),
                )
                .await
            }
            None => Err(ServiceError::DirectoryNotConfigured),
        };
        self.settle(LoginMethod::Directory, username, attempt.client_ip, outcome)
    }

    pub async fn login_with_federated(
        &self,
        access_token: &str,
        attempt: LoginAttempt<'_>,
    ) -> Result<AuthResult, ServiceError> {
        let outcome = match self.federated.enabled() {
            Some(federated) => {
                self.run(LoginMethod::Federated, attempt, federated.verify(access_token))
                    .await
            }
            None => Err(ServiceError::FederatedNotConfigured),
        };
        self.settle(LoginMethod::Federated, "", attempt.client_ip, outcome)
    }

    /// Second half of a step-up login. Only accepted while a challenge opened
    /// by a successful primary login for `username` is still live.
    pub async fn verify_two_factor(
        &self,
        username: &str,
        code: &str,
        client_ip: &str,
    ) -> Result<AuthResult, ServiceError> {
        let outcome = self.check_two_factor(username, code, client_ip).await;
        self.settle(LoginMethod::TwoFactor, username, client_ip, outcome)
    }

    async fn check_two_factor(
        &self,
        username: &str,
        code: &str,
        client_ip: &str,
    ) -> Result<AuthResult, ServiceError> {
        let step_up = self
            .step_up
            .enabled()
            .ok_or(ServiceError::StepUpUnavailable)?;

        let user = self
            .users
            .find_by_username(username)
            .await
            .map_err(ServiceError::Store)?
            .filter(|u| u.two_factor_enabled)
            .ok_or(ServiceError::TwoFactorInvalid)?;
        let phone = user
            .step_up_phone()
            .ok_or(ServiceError::PhoneNumberRequired)?;

        if !step_up.has_open_challenge(user.user_id).await? {
            return Err(ServiceError::TwoFactorInvalid);
        }
        if !step_up.verify_code(phone, code).await? {
            return Err(ServiceError::TwoFactorInvalid);
        }

        step_up.close_challenge(user.user_id).await?;
        self.issue(&user, LoginMethod::TwoFactor, client_ip).await
    }

    async fn run<F>(
        &self,
        method: LoginMethod,
        attempt: LoginAttempt<'_>,
        verify: F,
    ) -> Result<AuthResult, ServiceError>
    where
        F: Future<Output = Result<User, ServiceError>> + Send,
    {
        self.check_captcha(attempt.captcha).await?;

        let user = verify.await?;

        if method.checks_email() && self.email_verification_required && !user.email_confirmed {
            return Err(ServiceError::EmailNotConfirmed);
        }

        if user.two_factor_enabled {
            let step_up = self
                .step_up
                .enabled()
                .ok_or(ServiceError::StepUpUnavailable)?;
            let phone = user
                .step_up_phone()
                .ok_or(ServiceError::PhoneNumberRequired)?;

            match attempt.two_factor_code.filter(|c| !c.is_empty()) {
                None => {
                    step_up.open_challenge(user.user_id).await?;
                    step_up.request_code(phone).await?;
                    let masked = mask_phone(phone);
                    self.audit.record(
                        AuditEvent::new(AuditEventType::StepUpRequested)
                            .with_user(user.user_id)
                            .with_username(user.username.as_str())
                            .with_ip(attempt.client_ip)
                            .with_data(json!({ "method": method.as_str(), "masked_phone": masked })),
                    );
                    return Ok(AuthResult::step_up(masked));
                }
                Some(code) => {
                    if !step_up.verify_code(phone, code).await? {
                        return Err(ServiceError::TwoFactorInvalid);
                    }
                    step_up.close_challenge(user.user_id).await?;
                }
            }
        }

        self.issue(&user, method, attempt.client_ip).await
    }

    async fn check_captcha(&self, response: Option<&str>) -> Result<(), ServiceError> {
        if let Some(captcha) = self.captcha.enabled() {
            let response = response.unwrap_or_default();
            if response.is_empty() || !captcha.verify(response).await {
                return Err(ServiceError::CaptchaFailed);
            }
        }
        Ok(())
    }

    async fn issue(
        &self,
        user: &User,
        method: LoginMethod,
        client_ip: &str,
    ) -> Result<AuthResult, ServiceError> {
        let tokens = self
            .tokens
            .issue_token_pair(user, &user.roles, client_ip)
            .await?;

        tracing::info!(user_id = %user.user_id, method = method.as_str(), client_ip = %client_ip, "Login succeeded");
        self.audit.record(
            AuditEvent::new(AuditEventType::LoginSucceeded)
                .with_user(user.user_id)
                .with_username(user.username.as_str())
                .with_ip(client_ip)
                .with_data(json!({ "method": method.as_str() })),
        );

        Ok(AuthResult::authenticated(tokens))
    }

    /// Fold domain failures into the result; infrastructure faults propagate.
    fn settle(
        &self,
        method: LoginMethod,
        username: &str,
        client_ip: &str,
        outcome: Result<AuthResult, ServiceError>,
    ) -> Result<AuthResult, ServiceError> {
        match outcome {
            Ok(result) => Ok(result),
            Err(e) if e.is_fatal() => {
                tracing::error!(method = method.as_str(), error = %e, "Login aborted");
                Err(e)
            }
            Err(e) => {
                tracing::info!(method = method.as_str(), client_ip = %client_ip, reason = %e, "Login failed");
                let mut event = AuditEvent::new(AuditEventType::LoginFailed)
                    .with_ip(client_ip)
                    .with_data(json!({ "method": method.as_str(), "error_code": e.code() }));
                if !username.is_empty() {
                    event = event.with_username(username);
                }
                self.audit.record(event);
                Ok(AuthResult::failed(&e))
            }
        }
    }
}
