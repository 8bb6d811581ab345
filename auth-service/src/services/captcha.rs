//! Captcha gate for interactive login.

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::CaptchaConfig;

/// Checks a client-supplied captcha response with the issuing provider.
///
/// Implementations fail closed: any provider or transport error is `false`.
#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    async fn verify(&self, response: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// reCAPTCHA `siteverify` client.
#[derive(Clone)]
pub struct RecaptchaVerifier {
    client: reqwest::Client,
    verify_url: String,
    secret_key: Option<Secret<String>>,
    min_score: f64,
}

impl RecaptchaVerifier {
    pub fn new(config: &CaptchaConfig) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        if config.secret_key.is_none() {
            tracing::warn!("CAPTCHA_SECRET_KEY not set; every captcha check will fail");
        }

        Ok(Self {
            client,
            verify_url: config.verify_url.clone(),
            secret_key: config.secret_key.clone(),
            min_score: config.min_score,
        })
    }

    fn accepts(&self, body: &SiteVerifyResponse) -> bool {
        // v2 responses carry no score.
        body.success && body.score.map(|s| s >= self.min_score).unwrap_or(true)
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(&self, response: &str) -> bool {
        if response.trim().is_empty() {
            return false;
        }
        let Some(secret) = self.secret_key.as_ref() else {
            return false;
        };

        let result = self
            .client
            .post(&self.verify_url)
            .form(&[
                ("secret", secret.expose_secret().as_str()),
                ("response", response),
            ])
            .send()
            .await;

        let resp = match result {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "Captcha provider returned an error status");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Captcha provider unreachable");
                return false;
            }
        };

        match resp.json::<SiteVerifyResponse>().await {
            Ok(body) => {
                let accepted = self.accepts(&body);
                if !accepted {
                    tracing::info!(score = ?body.score, errors = ?body.error_codes, "Captcha rejected");
                }
                accepted
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unparsable captcha provider response");
                false
            }
        }
    }
}

/// Accepts exactly one configured response value and counts calls.
pub struct MockCaptchaVerifier {
    accepted: String,
    calls: AtomicUsize,
}

impl MockCaptchaVerifier {
    pub fn accepting(response: &str) -> Self {
        Self {
            accepted: response.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptchaVerifier for MockCaptchaVerifier {
    async fn verify(&self, response: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        !response.is_empty() && response == self.accepted
    }
}
