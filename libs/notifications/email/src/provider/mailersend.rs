//! MailerSend provider
//!
//! Sends emails via the MailerSend HTTP API. Sender verification checks that
//! the sender's domain is registered on the account.

use super::{Envelope, MailProvider, ProviderError, SendFailure, sender_domain};
use crate::secrets::ApiToken;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

/// MailerSend API base URL
pub const MAILERSEND_API_URL: &str = "https://api.mailersend.com/v1";

/// Default per-call timeout
pub const MAILERSEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Only the first page of domains is inspected.
const DOMAIN_PAGE: u32 = 1;
const DOMAIN_PAGE_LIMIT: u32 = 25;

const PROVIDER: &str = "mailersend";

#[derive(Debug, Clone)]
pub struct MailerSendConfig {
    pub api_url: String,
    pub timeout: Duration,
}

impl Default for MailerSendConfig {
    fn default() -> Self {
        Self {
            api_url: MAILERSEND_API_URL.to_string(),
            timeout: MAILERSEND_TIMEOUT,
        }
    }
}

/// MailerSend provider
pub struct MailerSendProvider {
    config: MailerSendConfig,
    client: Client,
}

impl MailerSendProvider {
    pub fn new(config: MailerSendConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build MailerSend client, using defaults");
                Client::new()
            });

        Self { config, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }
}

impl Default for MailerSendProvider {
    fn default() -> Self {
        Self::new(MailerSendConfig::default())
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: Address<'a>,
    to: Vec<Address<'a>>,
    subject: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct DomainList {
    #[serde(default)]
    data: Vec<Domain>,
}

#[derive(Debug, Deserialize)]
struct Domain {
    name: String,
}

#[async_trait]
impl MailProvider for MailerSendProvider {
    async fn send(&self, token: &ApiToken, envelope: &Envelope) -> Result<String, SendFailure> {
        let request = SendRequest {
            from: Address {
                email: &envelope.from,
            },
            to: vec![Address { email: &envelope.to }],
            subject: &envelope.subject,
            text: &envelope.body,
        };

        debug!(to = %envelope.to, subject = %envelope.subject, "Sending email via MailerSend");

        let response = self
            .client
            .post(self.url("email"))
            .bearer_auth(token.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, self.config.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, error = %body, "MailerSend API error");
            return Err(ProviderError::from_status(PROVIDER, status, body).into());
        }

        // MailerSend returns the message ID in the X-Message-Id header
        let message_id = response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        debug!(message_id = %message_id, "Email accepted by MailerSend");
        Ok(message_id)
    }

    async fn verify(&self, token: &ApiToken, sender_email: &str) -> Result<(), ProviderError> {
        let domain = sender_domain(sender_email)?;

        let response = self
            .client
            .get(self.url("domains"))
            .query(&[("page", DOMAIN_PAGE), ("limit", DOMAIN_PAGE_LIMIT)])
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(|e| match ProviderError::from_reqwest(PROVIDER, self.config.timeout, e) {
                timeout @ ProviderError::Timeout { .. } => timeout,
                other => {
                    debug!(error = %other, "Domain listing failed");
                    ProviderError::NoDomainList
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = %status, error = %body, "Domain listing rejected");
            return Err(match ProviderError::from_status(PROVIDER, status, body) {
                rate_limited @ ProviderError::RateLimited { .. } => rate_limited,
                _ => ProviderError::NoDomainList,
            });
        }

        let domains: DomainList = response.json().await.map_err(|e| {
            debug!(error = %e, "Domain listing could not be decoded");
            ProviderError::NoDomainList
        })?;

        if domains
            .data
            .iter()
            .any(|d| d.name.eq_ignore_ascii_case(domain))
        {
            Ok(())
        } else {
            Err(ProviderError::DomainNotFound(domain.to_string()))
        }
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }
}
