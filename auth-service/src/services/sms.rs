use async_trait::async_trait;
use std::sync::Mutex;

use crate::utils::mask_phone;

/// Outbound text-message channel.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> Result<(), anyhow::Error>;
}

/// Sender that only records the dispatch in the log.
///
/// The message body is never logged since it carries the code.
#[derive(Debug, Default, Clone)]
pub struct LoggingSmsSender;

#[async_trait]
impl SmsSender for LoggingSmsSender {
    async fn send(&self, phone: &str, message: &str) -> Result<(), anyhow::Error> {
        tracing::info!(
            destination = %mask_phone(phone),
            length = message.len(),
            "SMS dispatched"
        );
        Ok(())
    }
}

/// Captures sent messages for assertions.
#[derive(Default)]
pub struct MockSmsSender {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

impl MockSmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages_to(&self, phone: &str) -> Vec<String> {
        self.sent
            .lock()
            .map(|sent| {
                sent.iter()
                    .filter(|(to, _)| to == phone)
                    .map(|(_, body)| body.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SmsSender for MockSmsSender {
    async fn send(&self, phone: &str, message: &str) -> Result<(), anyhow::Error> {
        if self.fail {
            return Err(anyhow::anyhow!("SMS gateway unavailable"));
        }
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .push((phone.to_string(), message.to_string()));
        Ok(())
    }
}
