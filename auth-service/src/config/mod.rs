use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub token: TokenConfig,
    pub policy: PolicyConfig,
    pub lockout: LockoutConfig,
    pub password_policy: PasswordPolicy,
    pub step_up: StepUpConfig,
    pub rate_limit: RateLimitConfig,
    /// `None` when `LDAP_HOST` is unset; directory-bind login then fails fast.
    pub ldap: Option<LdapConfig>,
    pub google: GoogleConfig,
    pub captcha: CaptchaConfig,
    /// Browser origins allowed by CORS; empty disables the CORS layer.
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// Signing configuration for access tokens.
///
/// Built once at startup and shared read-only with the token service.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub signing_key: Secret<String>,
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_minutes: i64,
}

/// Feature switches evaluated by the orchestrators.
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    pub captcha_enabled: bool,
    pub email_verification_required: bool,
    pub ip_lock_enabled: bool,
    pub two_factor_enabled: bool,
    pub oauth_enabled: bool,
    pub phone_registration_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct LockoutConfig {
    pub max_failed_attempts: i32,
    pub lockout_minutes: i64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_minutes: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_number: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: false,
            require_number: false,
            require_special: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepUpConfig {
    pub code_length: usize,
    pub code_ttl_seconds: u64,
}

impl Default for StepUpConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            code_ttl_seconds: 300,
        }
    }
}

/// Per-address quota on the routes that accept or send one-time codes.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub code_attempts: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            code_attempts: 10,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LdapConfig {
    pub host: String,
    pub port: u16,
    pub base_dn: String,
    pub bind_dn: String,
    pub bind_password: Secret<String>,
    pub timeout_seconds: u64,
}

impl LdapConfig {
    pub fn url(&self) -> String {
        format!("ldap://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub userinfo_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    pub verify_url: String,
    pub secret_key: Option<Secret<String>>,
    pub min_score: f64,
    pub timeout_seconds: u64,
}

const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let ldap = match env::var("LDAP_HOST").ok().filter(|h| !h.trim().is_empty()) {
            Some(host) => Some(LdapConfig {
                host,
                port: parse_env("LDAP_PORT", "389")?,
                base_dn: get_env("LDAP_BASE_DN", None, is_prod)?,
                bind_dn: get_env("LDAP_BIND_DN", None, is_prod)?,
                bind_password: Secret::new(get_env("LDAP_BIND_PASSWORD", None, is_prod)?),
                timeout_seconds: parse_env("LDAP_TIMEOUT_SECONDS", "10")?,
            }),
            None => None,
        };

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("auth-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1")?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
            },
            token: TokenConfig {
                signing_key: Secret::new(get_env("TOKEN_SIGNING_KEY", None, is_prod)?),
                issuer: get_env("TOKEN_ISSUER", Some("auth-service"), is_prod)?,
                audience: get_env("TOKEN_AUDIENCE", Some("auth-clients"), is_prod)?,
                access_token_expiry_minutes: parse_env("TOKEN_ACCESS_EXPIRY_MINUTES", "15")?,
                refresh_token_expiry_minutes: parse_env("TOKEN_REFRESH_EXPIRY_MINUTES", "10080")?,
            },
            policy: PolicyConfig {
                captcha_enabled: parse_env("AUTH_CAPTCHA_ENABLED", "false")?,
                email_verification_required: parse_env("AUTH_EMAIL_VERIFICATION_REQUIRED", "false")?,
                ip_lock_enabled: parse_env("AUTH_IP_LOCK_ENABLED", "false")?,
                two_factor_enabled: parse_env("AUTH_TWO_FACTOR_ENABLED", "false")?,
                oauth_enabled: parse_env("AUTH_OAUTH_ENABLED", "false")?,
                phone_registration_enabled: parse_env("AUTH_PHONE_REGISTRATION_ENABLED", "false")?,
            },
            lockout: LockoutConfig {
                max_failed_attempts: parse_env("LOCKOUT_MAX_FAILED_ATTEMPTS", "5")?,
                lockout_minutes: parse_env("LOCKOUT_MINUTES", "5")?,
            },
            password_policy: PasswordPolicy {
                min_length: parse_env("PASSWORD_MIN_LENGTH", "8")?,
                require_uppercase: parse_env("PASSWORD_REQUIRE_UPPERCASE", "true")?,
                require_number: parse_env("PASSWORD_REQUIRE_NUMBER", "true")?,
                require_special: parse_env("PASSWORD_REQUIRE_SPECIAL", "false")?,
            },
            step_up: StepUpConfig {
                code_length: parse_env("STEP_UP_CODE_LENGTH", "6")?,
                code_ttl_seconds: parse_env("STEP_UP_CODE_TTL_SECONDS", "300")?,
            },
            rate_limit: RateLimitConfig {
                code_attempts: parse_env("RATE_LIMIT_CODE_ATTEMPTS", "10")?,
                window_seconds: parse_env("RATE_LIMIT_WINDOW_SECONDS", "60")?,
            },
            ldap,
            google: GoogleConfig {
                userinfo_url: get_env("GOOGLE_USERINFO_URL", Some(GOOGLE_USERINFO_URL), false)?,
                timeout_seconds: parse_env("GOOGLE_TIMEOUT_SECONDS", "10")?,
            },
            captcha: CaptchaConfig {
                verify_url: get_env("CAPTCHA_VERIFY_URL", Some(RECAPTCHA_VERIFY_URL), false)?,
                secret_key: env::var("CAPTCHA_SECRET_KEY")
                    .ok()
                    .filter(|v| !v.is_empty())
                    .map(Secret::new),
                min_score: parse_env("CAPTCHA_MIN_SCORE", "0.5")?,
                timeout_seconds: parse_env("CAPTCHA_TIMEOUT_SECONDS", "5")?,
            },
            allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.token.signing_key.expose_secret().len() < 32 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_SIGNING_KEY must be at least 32 bytes"
            )));
        }

        if self.token.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_ACCESS_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.token.refresh_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_REFRESH_EXPIRY_MINUTES must be positive"
            )));
        }

        if !(4..=8).contains(&self.step_up.code_length) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STEP_UP_CODE_LENGTH must be between 4 and 8"
            )));
        }

        if self.step_up.code_ttl_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "STEP_UP_CODE_TTL_SECONDS must be positive"
            )));
        }

        if self.rate_limit.code_attempts == 0 || self.rate_limit.window_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RATE_LIMIT_CODE_ATTEMPTS and RATE_LIMIT_WINDOW_SECONDS must be positive"
            )));
        }

        if self.lockout.max_failed_attempts <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LOCKOUT_MAX_FAILED_ATTEMPTS must be positive"
            )));
        }

        if !(0.0..=1.0).contains(&self.captcha.min_score) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CAPTCHA_MIN_SCORE must be between 0.0 and 1.0"
            )));
        }

        if self.policy.captcha_enabled && self.captcha.secret_key.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CAPTCHA_SECRET_KEY is required when AUTH_CAPTCHA_ENABLED is set"
            )));
        }

        if self.environment == Environment::Prod && !self.policy.email_verification_required {
            tracing::warn!("Email verification is disabled in production");
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e))
    })
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
