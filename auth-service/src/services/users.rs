//! Local user directory: lookups, creation, and password checks with lockout tracking.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{NewUser, User};
use crate::services::{PolicyService, ServiceError};
use crate::utils::{hash_password, password_matches, Password};

/// Result of checking a password against a stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Valid,
    Invalid,
    /// The account is (or just became) locked; the password was not accepted.
    LockedOut,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, anyhow::Error>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error>;
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, anyhow::Error>;
    /// Fails with `ValidationFailed` carrying every violation found.
    async fn create_user(&self, new_user: NewUser) -> Result<User, ServiceError>;
    /// Checks the password and updates the failure counter / lockout window.
    async fn verify_password(
        &self,
        user: &User,
        password: &Password,
    ) -> Result<PasswordCheck, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// Accounts without a stored hash (federated, phone) never match.
fn user_password_matches(user: &User, password: &Password) -> bool {
    user.password_hash
        .as_deref()
        .map(|hash| password_matches(password, hash))
        .unwrap_or(false)
}

fn hash_new_password(new_user: &NewUser) -> Result<Option<String>, ServiceError> {
    new_user
        .password
        .as_ref()
        .map(|password| hash_password(password).map_err(ServiceError::Internal))
        .transpose()
}

fn username_taken(username: &str) -> String {
    format!("Username '{}' is already taken.", username)
}

fn email_taken(email: &str) -> String {
    format!("Email '{}' is already taken.", email)
}

const USER_COLUMNS: &str = "user_id, username, email, phone_number, password_hash, email_confirmed, \
     two_factor_enabled, access_failed_count, lockout_end_utc, roles, created_utc";

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
    policy: PolicyService,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool, policy: PolicyService) -> Self {
        Self { pool, policy }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, anyhow::Error> {
        let query = format!(
            "SELECT {} FROM users WHERE LOWER(username) = LOWER($1)",
            USER_COLUMNS
        );
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        let query = format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        );
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, anyhow::Error> {
        let query = format!("SELECT {} FROM users WHERE user_id = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, ServiceError> {
        let mut errors = self.policy.validate_new_user(&new_user);

        if self
            .find_by_username(new_user.username.trim())
            .await
            .map_err(ServiceError::Store)?
            .is_some()
        {
            errors.push(username_taken(&new_user.username));
        }

        if let Some(email) = new_user.email.as_deref() {
            if self
                .find_by_email(email)
                .await
                .map_err(ServiceError::Store)?
                .is_some()
            {
                errors.push(email_taken(email));
            }
        }

        if !errors.is_empty() {
            return Err(ServiceError::ValidationFailed(errors));
        }

        let user = User::from_new(&new_user, hash_new_password(&new_user)?);

        let result = sqlx::query(
            r#"
            INSERT INTO users (user_id, username, email, phone_number, password_hash,
                email_confirmed, two_factor_enabled, access_failed_count, lockout_end_utc,
                roles, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.phone_number)
        .bind(&user.password_hash)
        .bind(user.email_confirmed)
        .bind(user.two_factor_enabled)
        .bind(user.access_failed_count)
        .bind(user.lockout_end_utc)
        .bind(&user.roles)
        .bind(user.created_utc)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(user),
            // Lost a race with a concurrent registration for the same name.
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                ServiceError::ValidationFailed(vec![username_taken(&new_user.username)]),
            ),
            Err(e) => Err(ServiceError::Store(e.into())),
        }
    }

    async fn verify_password(
        &self,
        user: &User,
        password: &Password,
    ) -> Result<PasswordCheck, anyhow::Error> {
        let now = Utc::now();
        if user.is_locked_out(now) {
            return Ok(PasswordCheck::LockedOut);
        }

        if user_password_matches(user, password) {
            if user.access_failed_count != 0 || user.lockout_end_utc.is_some() {
                sqlx::query(
                    "UPDATE users SET access_failed_count = 0, lockout_end_utc = NULL WHERE user_id = $1",
                )
                .bind(user.user_id)
                .execute(&self.pool)
                .await?;
            }
            return Ok(PasswordCheck::Valid);
        }

        let lockout = self.policy.lockout();
        let lockout_end = now + chrono::Duration::minutes(lockout.lockout_minutes);

        // Counter is incremented in SQL so concurrent failures are not lost.
        let locked_until: Option<chrono::DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE users SET
                lockout_end_utc = CASE WHEN access_failed_count + 1 >= $2 THEN $3 ELSE lockout_end_utc END,
                access_failed_count = CASE WHEN access_failed_count + 1 >= $2 THEN 0 ELSE access_failed_count + 1 END
            WHERE user_id = $1
            RETURNING lockout_end_utc
            "#,
        )
        .bind(user.user_id)
        .bind(lockout.max_failed_attempts)
        .bind(lockout_end)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        if locked_until.map(|end| end > now).unwrap_or(false) {
            tracing::warn!(user_id = %user.user_id, "Account locked after repeated failures");
            Ok(PasswordCheck::LockedOut)
        } else {
            Ok(PasswordCheck::Invalid)
        }
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        crate::db::ping(&self.pool).await?;
        Ok(())
    }
}

/// In-memory directory for tests.
pub struct MockUserDirectory {
    users: Mutex<HashMap<Uuid, User>>,
    policy: PolicyService,
}

impl MockUserDirectory {
    pub fn new(policy: PolicyService) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Insert a fully formed user, bypassing validation.
    pub fn insert(&self, user: User) -> Result<(), anyhow::Error> {
        self.users
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .insert(user.user_id, user);
        Ok(())
    }

    fn find<F>(&self, predicate: F) -> Result<Option<User>, anyhow::Error>
    where
        F: Fn(&User) -> bool,
    {
        Ok(self
            .users
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .values()
            .find(|u| predicate(u))
            .cloned())
    }
}

#[async_trait]
impl UserDirectory for MockUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, anyhow::Error> {
        self.find(|u| u.username.eq_ignore_ascii_case(username))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        self.find(|u| {
            u.email
                .as_deref()
                .map(|e| e.eq_ignore_ascii_case(email))
                .unwrap_or(false)
        })
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, anyhow::Error> {
        self.find(|u| u.user_id == user_id)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, ServiceError> {
        let mut errors = self.policy.validate_new_user(&new_user);
        let password_hash = hash_new_password(&new_user)?;

        let mut users = self
            .users
            .lock()
            .map_err(|e| ServiceError::Store(anyhow::anyhow!("Lock poisoned: {}", e)))?;

        let username = new_user.username.trim();
        if users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(username))
        {
            errors.push(username_taken(&new_user.username));
        }
        if let Some(email) = new_user.email.as_deref() {
            if users.values().any(|u| {
                u.email
                    .as_deref()
                    .map(|e| e.eq_ignore_ascii_case(email))
                    .unwrap_or(false)
            }) {
                errors.push(email_taken(email));
            }
        }

        if !errors.is_empty() {
            return Err(ServiceError::ValidationFailed(errors));
        }

        let user = User::from_new(&new_user, password_hash);
        users.insert(user.user_id, user.clone());
        Ok(user)
    }

    async fn verify_password(
        &self,
        user: &User,
        password: &Password,
    ) -> Result<PasswordCheck, anyhow::Error> {
        let now = Utc::now();
        let mut users = self
            .users
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?;
        let stored = users
            .get_mut(&user.user_id)
            .ok_or_else(|| anyhow::anyhow!("User {} not found", user.user_id))?;

        if stored.is_locked_out(now) {
            return Ok(PasswordCheck::LockedOut);
        }

        if user_password_matches(stored, password) {
            stored.access_failed_count = 0;
            stored.lockout_end_utc = None;
            return Ok(PasswordCheck::Valid);
        }

        let outcome = self.policy.record_failure(stored.access_failed_count, now);
        stored.access_failed_count = outcome.access_failed_count;
        if let Some(end) = outcome.lockout_end_utc {
            stored.lockout_end_utc = Some(end);
            return Ok(PasswordCheck::LockedOut);
        }
        Ok(PasswordCheck::Invalid)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
