use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::StepUpConfig;
use crate::services::{ExpiringCache, ServiceError, SmsSender};
use crate::utils::mask_phone;

/// The flow a code was issued for. A code only ever verifies for its own purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePurpose {
    /// Second factor of a login whose primary credential already passed.
    Login,
    /// Proof of phone ownership ahead of phone registration.
    PhoneVerification,
}

impl CodePurpose {
    fn key_prefix(&self) -> &'static str {
        match self {
            CodePurpose::Login => "2fa",
            CodePurpose::PhoneVerification => "phone-verify",
        }
    }
}

/// One-time numeric codes bound to a phone number, held in the shared cache.
#[derive(Clone)]
pub struct StepUpService {
    cache: Arc<dyn ExpiringCache>,
    sms: Arc<dyn SmsSender>,
    code_length: usize,
    code_ttl: Duration,
    purpose: CodePurpose,
}

impl StepUpService {
    /// Issues [`CodePurpose::Login`] codes until re-scoped with [`with_purpose`](Self::with_purpose).
    pub fn new(
        cache: Arc<dyn ExpiringCache>,
        sms: Arc<dyn SmsSender>,
        config: &StepUpConfig,
    ) -> Self {
        Self {
            cache,
            sms,
            code_length: config.code_length,
            code_ttl: Duration::from_secs(config.code_ttl_seconds),
            purpose: CodePurpose::Login,
        }
    }

    pub fn with_purpose(mut self, purpose: CodePurpose) -> Self {
        self.purpose = purpose;
        self
    }

    pub fn purpose(&self) -> CodePurpose {
        self.purpose
    }

    pub fn code_ttl(&self) -> Duration {
        self.code_ttl
    }

    /// Generate a code, store it under the phone number, and dispatch it.
    ///
    /// A newer code replaces any outstanding one. Delivery happens in the
    /// background; its failures are logged and never reported to the caller.
    pub async fn request_code(&self, phone: &str) -> Result<(), ServiceError> {
        let code = generate_code(self.code_length);

        self.cache
            .set(&self.code_key(phone), &code, self.code_ttl)
            .await
            .map_err(ServiceError::Cache)?;

        let sms = self.sms.clone();
        let destination = phone.to_string();
        let message = format!("Your verification code is {}", code);
        tokio::spawn(async move {
            if let Err(e) = sms.send(&destination, &message).await {
                tracing::warn!(destination = %mask_phone(&destination), error = %e, "Failed to deliver step-up code");
            }
        });

        tracing::info!(destination = %mask_phone(phone), purpose = ?self.purpose, "Step-up code issued");
        Ok(())
    }

    /// `true` only when an unexpired code exists for `phone` and matches exactly.
    pub async fn verify_code(&self, phone: &str, submitted: &str) -> Result<bool, ServiceError> {
        if submitted.is_empty() {
            return Ok(false);
        }

        let stored = self
            .cache
            .get(&self.code_key(phone))
            .await
            .map_err(ServiceError::Cache)?;

        Ok(match stored {
            Some(code) => bool::from(code.as_bytes().ct_eq(submitted.as_bytes())),
            None => false,
        })
    }

    /// Record that `user_id` passed its primary credential and owes a code.
    /// Lives as long as the code itself.
    pub async fn open_challenge(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.cache
            .set(&challenge_key(user_id), "pending", self.code_ttl)
            .await
            .map_err(ServiceError::Cache)
    }

    pub async fn has_open_challenge(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        self.cache
            .get(&challenge_key(user_id))
            .await
            .map(|marker| marker.is_some())
            .map_err(ServiceError::Cache)
    }

    /// Close a challenge once it has been answered, so the code cannot be replayed.
    pub async fn close_challenge(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.cache
            .delete(&challenge_key(user_id))
            .await
            .map_err(ServiceError::Cache)
    }

    fn code_key(&self, phone: &str) -> String {
        format!("{}:{}", self.purpose.key_prefix(), phone)
    }
}

fn challenge_key(user_id: Uuid) -> String {
    format!("2fa-pending:{}", user_id)
}

fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockCache, MockSmsSender};

    const PHONE: &str = "5551234567";

    fn service(ttl_seconds: u64) -> (StepUpService, Arc<MockSmsSender>) {
        let sms = Arc::new(MockSmsSender::new());
        let service = StepUpService::new(
            Arc::new(MockCache::new()),
            sms.clone(),
            &StepUpConfig {
                code_length: 6,
                code_ttl_seconds: ttl_seconds,
            },
        );
        (service, sms)
    }

    async fn delivered_code(sms: &MockSmsSender) -> Result<String, anyhow::Error> {
        for _ in 0..50 {
            if let Some(message) = sms.messages_to(PHONE).last() {
                return message
                    .rsplit(' ')
                    .next()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("malformed message"));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(anyhow::anyhow!("no code delivered"))
    }

    #[test]
    fn codes_are_numeric_with_fixed_length() {
        for _ in 0..100 {
            let code = generate_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn correct_code_verifies() -> Result<(), anyhow::Error> {
        let (service, sms) = service(300);
        service.request_code(PHONE).await?;
        let code = delivered_code(&sms).await?;

        assert!(service.verify_code(PHONE, &code).await?);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_or_missing_code_fails_closed() -> Result<(), anyhow::Error> {
        let (service, sms) = service(300);
        assert!(!service.verify_code(PHONE, "123456").await?);

        service.request_code(PHONE).await?;
        let code = delivered_code(&sms).await?;

        assert!(!service.verify_code(PHONE, "").await?);
        assert!(!service.verify_code(PHONE, &format!(" {}", code)).await?);
        assert!(!service.verify_code("5550000000", &code).await?);
        Ok(())
    }

    #[tokio::test]
    async fn expired_code_fails() -> Result<(), anyhow::Error> {
        let (service, sms) = service(1);
        service.request_code(PHONE).await?;
        let code = delivered_code(&sms).await?;

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!service.verify_code(PHONE, &code).await?);
        Ok(())
    }

    #[tokio::test]
    async fn codes_do_not_cross_purposes() -> Result<(), anyhow::Error> {
        let cache: Arc<dyn ExpiringCache> = Arc::new(MockCache::new());
        let sms = Arc::new(MockSmsSender::new());
        let login = StepUpService::new(cache.clone(), sms.clone(), &StepUpConfig::default());
        let phone_verify = login.clone().with_purpose(CodePurpose::PhoneVerification);

        phone_verify.request_code(PHONE).await?;
        let code = delivered_code(&sms).await?;

        assert!(phone_verify.verify_code(PHONE, &code).await?);
        assert!(!login.verify_code(PHONE, &code).await?);
        Ok(())
    }

    #[tokio::test]
    async fn challenge_opens_and_closes() -> Result<(), anyhow::Error> {
        let (service, _) = service(300);
        let user_id = Uuid::new_v4();
        assert!(!service.has_open_challenge(user_id).await?);

        service.open_challenge(user_id).await?;
        assert!(service.has_open_challenge(user_id).await?);
        assert!(!service.has_open_challenge(Uuid::new_v4()).await?);

        service.close_challenge(user_id).await?;
        assert!(!service.has_open_challenge(user_id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn delivery_failure_is_not_reported() -> Result<(), anyhow::Error> {
        let service = StepUpService::new(
            Arc::new(MockCache::new()),
            Arc::new(MockSmsSender::failing()),
            &StepUpConfig::default(),
        );
        service.request_code(PHONE).await?;
        Ok(())
    }
}
