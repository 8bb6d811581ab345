//! Manual, federated and phone registration.

mod common;

use auth_service::services::{ErrorCode, LoginAttempt, Registration, UserDirectory};
use auth_service::utils::Password;
use common::{TestApp, TestPolicy, CLIENT_IP, GOOGLE_EMAIL, GOOGLE_TOKEN, PASSWORD};

const PHONE: &str = "5559876543";

fn registration(username: &str, password: &str, email: Option<&str>) -> Registration {
    Registration {
        username: username.to_string(),
        password: Password::new(password.to_string()),
        email: email.map(str::to_string),
        phone_number: None,
    }
}

#[tokio::test]
async fn registered_user_can_log_in() {
    // Arrange
    let app = TestApp::spawn();

    // Act
    let result = app
        .state
        .registration
        .register(
            registration("bob", PASSWORD, Some("bob@example.com")),
            CLIENT_IP,
        )
        .await
        .expect("register");

    // Assert
    assert!(result.success);
    let user_id = result.user_id.expect("user id");
    let stored = app
        .users
        .find_by_username("bob")
        .await
        .expect("lookup")
        .expect("user stored");
    assert_eq!(stored.user_id, user_id);
    assert!(!stored.email_confirmed);
    assert_ne!(stored.password_hash.as_deref(), Some(PASSWORD));

    let login = app
        .state
        .login
        .login_with_password(
            "bob",
            &Password::new(PASSWORD.to_string()),
            LoginAttempt {
                captcha: None,
                two_factor_code: None,
                client_ip: CLIENT_IP,
            },
        )
        .await
        .expect("login");
    assert!(login.success);
    assert!(app.audit_events().contains(&"user_registered".to_string()));
}

#[tokio::test]
async fn every_violation_is_reported_together() {
    let app = TestApp::spawn();
    app.add_user("alice", |_| {});

    let result = app
        .state
        .registration
        .register(
            registration("alice", "short", Some("alice@example.com")),
            CLIENT_IP,
        )
        .await
        .expect("register");

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::ValidationFailed));
    let message = result.error_message.expect("message");
    assert!(message.contains("Username 'alice' is already taken."));
    assert!(message.contains("Email 'alice@example.com' is already taken."));
    assert!(message.contains("at least 8"));
    assert!(app.audit_events().contains(&"registration_rejected".to_string()));
}

#[tokio::test]
async fn blank_optional_fields_are_dropped() {
    let app = TestApp::spawn();

    let result = app
        .state
        .registration
        .register(
            Registration {
                phone_number: Some("   ".to_string()),
                ..registration("dave", PASSWORD, Some(""))
            },
            CLIENT_IP,
        )
        .await
        .expect("register");

    assert!(result.success);
    let stored = app
        .users
        .find_by_username("dave")
        .await
        .expect("lookup")
        .expect("user");
    assert!(stored.email.is_none());
    assert!(stored.phone_number.is_none());
}

#[tokio::test]
async fn federated_registration_creates_passwordless_account_once() {
    let app = TestApp::with_policy(TestPolicy {
        oauth: true,
        ..Default::default()
    });

    let first = app
        .state
        .registration
        .register_with_federated(GOOGLE_TOKEN, CLIENT_IP)
        .await
        .expect("register");
    assert!(first.success);

    let stored = app
        .users
        .find_by_email(GOOGLE_EMAIL)
        .await
        .expect("lookup")
        .expect("user");
    assert_eq!(stored.username, GOOGLE_EMAIL);
    assert!(stored.password_hash.is_none());
    assert!(stored.email_confirmed);

    let second = app
        .state
        .registration
        .register_with_federated(GOOGLE_TOKEN, CLIENT_IP)
        .await
        .expect("register");
    assert_eq!(second.error_code, Some(ErrorCode::AlreadyRegistered));

    // The new account can now sign in through the provider.
    let login = app
        .state
        .login
        .login_with_federated(
            GOOGLE_TOKEN,
            LoginAttempt {
                captcha: None,
                two_factor_code: None,
                client_ip: CLIENT_IP,
            },
        )
        .await
        .expect("login");
    assert!(login.success);
}

#[tokio::test]
async fn federated_registration_disabled_by_policy() {
    let app = TestApp::spawn();

    let result = app
        .state
        .registration
        .register_with_federated(GOOGLE_TOKEN, CLIENT_IP)
        .await
        .expect("register");

    assert_eq!(result.error_code, Some(ErrorCode::FederatedNotConfigured));
}

#[tokio::test]
async fn phone_registration_requires_the_texted_code() {
    // Arrange
    let app = TestApp::with_policy(TestPolicy {
        phone_registration: true,
        ..Default::default()
    });

    let masked = app
        .state
        .registration
        .request_phone_code(PHONE)
        .await
        .expect("send code");
    assert_eq!(masked, "******6543");
    assert_eq!(app.state.registration.phone_code_ttl_seconds(), Some(300));
    let code = app.sms_code(PHONE).await;

    // Act
    let wrong = app
        .state
        .registration
        .register_with_phone(PHONE, "not-the-code", CLIENT_IP)
        .await
        .expect("register");
    let right = app
        .state
        .registration
        .register_with_phone(PHONE, &code, CLIENT_IP)
        .await
        .expect("register");

    // Assert
    assert_eq!(wrong.error_code, Some(ErrorCode::TwoFactorInvalid));
    assert!(right.success);
    let stored = app
        .users
        .find_by_username(PHONE)
        .await
        .expect("lookup")
        .expect("user");
    assert_eq!(stored.phone_number.as_deref(), Some(PHONE));
    assert!(stored.password_hash.is_none());
}

#[tokio::test]
async fn phone_registration_disabled_by_policy() {
    let app = TestApp::spawn();

    let send = app.state.registration.request_phone_code(PHONE).await;
    assert!(send.is_err());
    assert!(app.state.registration.phone_code_ttl_seconds().is_none());

    let result = app
        .state
        .registration
        .register_with_phone(PHONE, "123456", CLIENT_IP)
        .await
        .expect("register");
    assert_eq!(result.error_code, Some(ErrorCode::FeatureDisabled));
}
