//! Shared setup for auth-service integration tests.
//!
//! Every collaborator is an in-memory mock, so no database, cache, directory
//! or identity provider needs to be running.

#![allow(dead_code)]

use auth_service::{
    build_router,
    config::{LdapConfig, LockoutConfig, PasswordPolicy, StepUpConfig, TokenConfig},
    models::{NewUser, User},
    services::{
        AuditSink, Capability, CaptchaVerifier, DirectoryConnector, DirectoryVerifier,
        ExpiringCache, FederatedVerifier, IdentityProvider, LoginOrchestrator, MockAuditSink,
        MockCache, MockCaptchaVerifier, MockDirectory, MockIdentityProvider, MockSmsSender,
        MockTokenStore, MockUserDirectory, PolicyService, RefreshOrchestrator,
        RegistrationOrchestrator, StepUpService, TokenService, TokenStore, UserDirectory,
    },
    utils::{hash_password, Password},
    AppState,
};
use axum::Router;
use secrecy::Secret;
use service_core::middleware::create_client_ip_rate_limiter;
use std::sync::Arc;
use std::time::Duration;

pub const CLIENT_IP: &str = "198.51.100.7";
pub const PASSWORD: &str = "Correct-Horse-9";
pub const CAPTCHA_OK: &str = "captcha-ok";
pub const GOOGLE_TOKEN: &str = "google-access-token";
pub const GOOGLE_EMAIL: &str = "gina@example.com";
pub const BASE_DN: &str = "ou=people,dc=example,dc=com";
pub const SERVICE_DN: &str = "cn=auth-svc,dc=example,dc=com";
pub const SERVICE_PASSWORD: &str = "svc-secret";
pub const DIRECTORY_USER: &str = "carol";
pub const DIRECTORY_PASSWORD: &str = "carol-directory-pw";
pub const MAX_FAILED_ATTEMPTS: i32 = 3;

/// Feature switches for a test application; everything is off by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestPolicy {
    pub captcha: bool,
    pub two_factor: bool,
    pub email_verification: bool,
    pub ip_lock: bool,
    pub oauth: bool,
    pub phone_registration: bool,
    pub directory: bool,
    /// Per-address quota on the one-time-code routes; 0 means effectively unlimited.
    pub code_attempts: u32,
}

/// Fully wired application state plus handles on every mock.
pub struct TestApp {
    pub state: AppState,
    pub users: Arc<MockUserDirectory>,
    pub store: Arc<MockTokenStore>,
    pub sms: Arc<MockSmsSender>,
    pub audit: Arc<MockAuditSink>,
    pub captcha: Arc<MockCaptchaVerifier>,
    pub directory: MockDirectory,
}

pub fn token_config() -> TokenConfig {
    TokenConfig {
        signing_key: Secret::new("integration-test-signing-key-0123456789".to_string()),
        issuer: "auth-service-test".to_string(),
        audience: "auth-clients-test".to_string(),
        access_token_expiry_minutes: 15,
        refresh_token_expiry_minutes: 60,
    }
}

fn ldap_config() -> LdapConfig {
    LdapConfig {
        host: "ldap.test".to_string(),
        port: 389,
        base_dn: BASE_DN.to_string(),
        bind_dn: SERVICE_DN.to_string(),
        bind_password: Secret::new(SERVICE_PASSWORD.to_string()),
        timeout_seconds: 1,
    }
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_policy(TestPolicy::default())
    }

    pub fn with_policy(policy: TestPolicy) -> Self {
        Self::with_token_store(policy, |store| -> Arc<dyn TokenStore> { store })
    }

    /// Like [`with_policy`](Self::with_policy), but the token service talks to
    /// whatever `wrap` builds around the in-memory store.
    pub fn with_token_store(
        policy: TestPolicy,
        wrap: impl FnOnce(Arc<MockTokenStore>) -> Arc<dyn TokenStore>,
    ) -> Self {
        let users = Arc::new(MockUserDirectory::new(PolicyService::new(
            PasswordPolicy::default(),
            LockoutConfig {
                max_failed_attempts: MAX_FAILED_ATTEMPTS,
                lockout_minutes: 5,
            },
        )));
        let store = Arc::new(MockTokenStore::new());
        let sms = Arc::new(MockSmsSender::new());
        let audit = Arc::new(MockAuditSink::new());
        let captcha = Arc::new(MockCaptchaVerifier::accepting(CAPTCHA_OK));
        let cache: Arc<dyn ExpiringCache> = Arc::new(MockCache::new());
        let directory_user_dn = format!("uid={},{}", DIRECTORY_USER, BASE_DN);
        let directory = MockDirectory::new(&[
            (SERVICE_DN, SERVICE_PASSWORD),
            (directory_user_dn.as_str(), DIRECTORY_PASSWORD),
        ]);

        let user_directory: Arc<dyn UserDirectory> = users.clone();
        let audit_sink: Arc<dyn AuditSink> = audit.clone();
        let tokens = TokenService::new(Arc::new(token_config()), wrap(store.clone()));
        let step_up = StepUpService::new(cache.clone(), sms.clone(), &StepUpConfig::default());

        let provider: Arc<dyn IdentityProvider> =
            Arc::new(MockIdentityProvider::new().with_identity(GOOGLE_TOKEN, GOOGLE_EMAIL));
        let federated = FederatedVerifier::new(provider, user_directory.clone());

        let connector: Arc<dyn DirectoryConnector> = Arc::new(directory.clone());
        let directory_verifier =
            DirectoryVerifier::new(connector, user_directory.clone(), &ldap_config());
        let captcha_verifier: Arc<dyn CaptchaVerifier> = captcha.clone();

        let login = LoginOrchestrator::new(
            user_directory.clone(),
            tokens.clone(),
            audit_sink.clone(),
            policy.email_verification,
        )
        .with_captcha(Capability::when(policy.captcha, captcha_verifier))
        .with_step_up(Capability::when(policy.two_factor, step_up.clone()))
        .with_directory(Capability::when(policy.directory, directory_verifier))
        .with_federated(Capability::when(policy.oauth, federated.clone()));

        let refresh = RefreshOrchestrator::new(
            tokens.clone(),
            user_directory.clone(),
            audit_sink.clone(),
            policy.ip_lock,
        );

        let registration = RegistrationOrchestrator::new(user_directory, audit_sink)
            .with_federated(Capability::when(policy.oauth, federated))
            .with_phone(Capability::when(policy.phone_registration, step_up));

        let state = AppState {
            service_name: "auth-service-test".to_string(),
            service_version: "0.0.0-test".to_string(),
            login,
            refresh,
            registration,
            tokens,
            cache,
            allowed_origins: Vec::new(),
            code_rate_limiter: create_client_ip_rate_limiter(
                match policy.code_attempts {
                    0 => 1_000,
                    n => n,
                },
                60,
            ),
        };

        Self {
            state,
            users,
            store,
            sms,
            audit,
            captcha,
            directory,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Insert a confirmed user with [`PASSWORD`]; `configure` adjusts it before insert.
    pub fn add_user(&self, username: &str, configure: impl FnOnce(&mut User)) -> User {
        let hash =
            hash_password(&Password::new(PASSWORD.to_string())).expect("Failed to hash password");
        let mut user = User::from_new(
            &NewUser {
                username: username.to_string(),
                email: Some(format!("{}@example.com", username)),
                phone_number: None,
                password: None,
                email_confirmed: true,
                roles: vec!["user".to_string()],
            },
            Some(hash),
        );
        configure(&mut user);
        self.users.insert(user.clone()).expect("Failed to insert user");
        user
    }

    /// Wait for the background SMS dispatch and return the code it carried.
    pub async fn sms_code(&self, phone: &str) -> String {
        for _ in 0..100 {
            if let Some(message) = self.sms.messages_to(phone).last() {
                return message
                    .split_whitespace()
                    .last()
                    .expect("Empty SMS body")
                    .to_string();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("No SMS delivered to {}", phone);
    }

    pub fn audit_events(&self) -> Vec<String> {
        self.audit.event_types()
    }
}
