//! Mock mail provider for testing

use super::{Envelope, MailProvider, ProviderError, SendFailure};
use crate::secrets::ApiToken;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Mock provider that records sends and verifications
pub struct MockProvider {
    name: &'static str,
    timeout: Duration,
    delay: Option<Duration>,
    send_outcome: Option<Result<String, SendFailure>>,
    verify_outcome: Result<(), ProviderError>,
    sent: Mutex<Vec<Envelope>>,
    verified: Mutex<Vec<String>>,
}

impl MockProvider {
    /// Create a mock that accepts everything and returns `mock-<uuid>` ids
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            timeout: Duration::from_secs(5),
            delay: None,
            send_outcome: None,
            verify_outcome: Ok(()),
            sent: Mutex::new(Vec::new()),
            verified: Mutex::new(Vec::new()),
        }
    }

    /// Return this id from every send
    pub fn returning_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.send_outcome = Some(Ok(message_id.into()));
        self
    }

    /// Fail every send
    pub fn failing_send(mut self, error: ProviderError) -> Self {
        self.send_outcome = Some(Err(SendFailure::new(error)));
        self
    }

    /// Fail every verification
    pub fn failing_verify(mut self, error: ProviderError) -> Self {
        self.verify_outcome = Err(error);
        self
    }

    /// Sleep before answering, to exercise timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get all sent envelopes
    pub async fn sent_emails(&self) -> Vec<Envelope> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Sender addresses passed to `verify`
    pub async fn verified_senders(&self) -> Vec<String> {
        self.verified.lock().await.clone()
    }

    pub async fn verify_count(&self) -> usize {
        self.verified.lock().await.len()
    }

    /// Check if an email was sent to a specific address
    pub async fn was_sent_to(&self, address: &str) -> bool {
        self.sent.lock().await.iter().any(|e| e.to == address)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MailProvider for MockProvider {
    async fn send(&self, _token: &ApiToken, envelope: &Envelope) -> Result<String, SendFailure> {
        self.pause().await;

        let outcome = self
            .send_outcome
            .clone()
            .unwrap_or_else(|| Ok(format!("mock-{}", Uuid::new_v4())));

        if outcome.is_ok() {
            self.sent.lock().await.push(envelope.clone());
        }
        outcome
    }

    async fn verify(&self, _token: &ApiToken, sender_email: &str) -> Result<(), ProviderError> {
        self.pause().await;
        self.verified.lock().await.push(sender_email.to_string());
        self.verify_outcome.clone()
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
