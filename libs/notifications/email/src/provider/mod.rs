//! Mail provider adapters
//!
//! Each adapter is a stateless HTTP client implementing [`MailProvider`].
//! Calls are always made through [`send_with_timeout`] / [`verify_with_timeout`]
//! so every request is bounded by the adapter's timeout.

pub mod mailersend;
pub mod mailgun;
pub mod mock;

pub use mailersend::{MailerSendConfig, MailerSendProvider};
pub use mailgun::{MailgunConfig, MailgunProvider};
pub use mock::MockProvider;

use crate::secrets::ApiToken;
use async_trait::async_trait;
use reconcile_worker::ErrorCategory;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Message to dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Errors reported by provider adapters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{provider} request timed out after {timeout:?}")]
    Timeout {
        provider: &'static str,
        timeout: Duration,
    },

    #[error("{provider} rate limit exceeded")]
    RateLimited { provider: &'static str },

    #[error("{provider} authentication failed")]
    Unauthorized { provider: &'static str },

    #[error("{provider} rejected request ({status}): {message}")]
    Rejected {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider} request failed: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    #[error("invalid sender email: {0}")]
    InvalidSender(String),

    #[error("no domain list available")]
    NoDomainList,

    #[error("domain not found: {0}")]
    DomainNotFound(String),

    #[error("email is not valid: {address} ({result})")]
    InvalidAddress { address: String, result: String },
}

impl ProviderError {
    /// Map a non-success HTTP response.
    pub fn from_status(provider: &'static str, status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { provider },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ProviderError::Unauthorized { provider }
            }
            _ => ProviderError::Rejected {
                provider,
                status: status.as_u16(),
                message: body,
            },
        }
    }

    /// Map a reqwest transport error.
    pub fn from_reqwest(provider: &'static str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout { provider, timeout }
        } else {
            ProviderError::Transport {
                provider,
                message: err.to_string(),
            }
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::RateLimited { .. } => ErrorCategory::RateLimited,
            _ => ErrorCategory::Transient,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout { .. })
    }
}

/// A failed send. Some providers still hand out a message id on failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct SendFailure {
    pub message_id: Option<String>,
    #[source]
    pub error: ProviderError,
}

impl SendFailure {
    pub fn new(error: ProviderError) -> Self {
        Self {
            message_id: None,
            error,
        }
    }
}

impl From<ProviderError> for SendFailure {
    fn from(error: ProviderError) -> Self {
        Self::new(error)
    }
}

/// Trait for mail providers
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Send one message, returning the provider message id (may be empty).
    async fn send(&self, token: &ApiToken, envelope: &Envelope) -> Result<String, SendFailure>;

    /// Check that `token` may send as `sender_email`.
    async fn verify(&self, token: &ApiToken, sender_email: &str) -> Result<(), ProviderError>;

    /// Provider name for logging and metric labels
    fn name(&self) -> &'static str;

    /// Upper bound for a single call
    fn timeout(&self) -> Duration;
}

/// [`MailProvider::send`] bounded by the provider timeout.
///
/// On expiry the request future is dropped, which cancels the HTTP call.
pub async fn send_with_timeout(
    provider: &dyn MailProvider,
    token: &ApiToken,
    envelope: &Envelope,
) -> Result<String, SendFailure> {
    let timeout = provider.timeout();
    match tokio::time::timeout(timeout, provider.send(token, envelope)).await {
        Ok(result) => result,
        Err(_) => Err(SendFailure::new(ProviderError::Timeout {
            provider: provider.name(),
            timeout,
        })),
    }
}

/// [`MailProvider::verify`] bounded by the provider timeout.
pub async fn verify_with_timeout(
    provider: &dyn MailProvider,
    token: &ApiToken,
    sender_email: &str,
) -> Result<(), ProviderError> {
    let timeout = provider.timeout();
    tokio::time::timeout(timeout, provider.verify(token, sender_email))
        .await
        .unwrap_or(Err(ProviderError::Timeout {
            provider: provider.name(),
            timeout,
        }))
}

/// Domain part of an email address (after the last `@`).
pub fn sender_domain(email: &str) -> Result<&str, ProviderError> {
    match email.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(domain),
        _ => Err(ProviderError::InvalidSender(email.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_domain() {
        assert_eq!(sender_domain("noreply@example.com").unwrap(), "example.com");
        assert_eq!(sender_domain("\"a@b\"@mail.example.com").unwrap(), "mail.example.com");
        assert!(sender_domain("not-an-address").is_err());
        assert!(sender_domain("trailing@").is_err());
        assert!(sender_domain("@example.com").is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProviderError::from_status("mailgun", StatusCode::TOO_MANY_REQUESTS, String::new())
                .category(),
            ErrorCategory::RateLimited
        );
        assert!(matches!(
            ProviderError::from_status("mailgun", StatusCode::FORBIDDEN, String::new()),
            ProviderError::Unauthorized { .. }
        ));
        assert!(matches!(
            ProviderError::from_status("mailgun", StatusCode::BAD_REQUEST, "bad".into()),
            ProviderError::Rejected { status: 400, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_with_timeout_cancels_slow_provider() {
        let provider = MockProvider::new("mailgun")
            .with_timeout(Duration::from_secs(10))
            .with_delay(Duration::from_secs(60));
        let envelope = Envelope {
            from: "noreply@example.com".into(),
            to: "user@example.com".into(),
            subject: "Hi".into(),
            body: "Body".into(),
        };

        let failure = send_with_timeout(&provider, &ApiToken::new("t"), &envelope)
            .await
            .unwrap_err();

        assert!(failure.error.is_timeout());
        assert_eq!(failure.message_id, None);
        assert_eq!(failure.to_string(), "mailgun request timed out after 10s");
        assert_eq!(provider.sent_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_with_timeout() {
        let provider = MockProvider::new("mailersend")
            .with_timeout(Duration::from_secs(5))
            .with_delay(Duration::from_secs(6));

        let err = verify_with_timeout(&provider, &ApiToken::new("t"), "a@example.com")
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
