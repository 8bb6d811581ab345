//! Services layer for auth-service.
//!
//! Collaborator traits (user directory, token store, cache, SMS, identity
//! provider, captcha, directory connector) with production and mock
//! implementations, and the orchestrators built on top of them.

mod audit;
mod cache;
mod capability;
mod captcha;
pub mod error;
mod google;
mod ldap;
mod login;
mod policy;
mod refresh;
mod register;
mod sms;
mod step_up;
mod token;
mod token_store;
mod users;
mod verifier;

pub use audit::{AuditSink, MockAuditSink, PgAuditSink, TracingAuditSink};
pub use cache::{ExpiringCache, MockCache, RedisCache};
pub use capability::Capability;
pub use captcha::{CaptchaVerifier, MockCaptchaVerifier, RecaptchaVerifier};
pub use error::{DirectoryFailure, ErrorCode, ServiceError};
pub use google::{FederatedIdentity, GoogleIdentityProvider, IdentityProvider, MockIdentityProvider};
pub use ldap::{BindOutcome, DirectoryConnection, DirectoryConnector, LdapConnector, MockDirectory};
pub use login::{LoginAttempt, LoginOrchestrator};
pub use policy::{FailureOutcome, PolicyError, PolicyService};
pub use refresh::RefreshOrchestrator;
pub use register::{Registration, RegistrationOrchestrator};
pub use sms::{LoggingSmsSender, MockSmsSender, SmsSender};
pub use step_up::{CodePurpose, StepUpService};
pub use token::{AccessTokenClaims, TokenPair, TokenService};
pub use token_store::{MockTokenStore, PgTokenStore, TokenStore};
pub use users::{MockUserDirectory, PasswordCheck, PgUserDirectory, UserDirectory};
pub use verifier::{CredentialVerifier, DirectoryVerifier, FederatedVerifier};
