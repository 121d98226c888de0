//! Mailgun provider
//!
//! Uses basic auth (`api:<token>`). Messages are posted to the sender's
//! domain; verification runs the address validation endpoint on the sender.

use super::{Envelope, MailProvider, ProviderError, SendFailure, sender_domain};
use crate::secrets::ApiToken;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Mailgun API base URL (US region; EU accounts use `https://api.eu.mailgun.net`)
pub const MAILGUN_API_URL: &str = "https://api.mailgun.net";

/// Default per-call timeout
pub const MAILGUN_TIMEOUT: Duration = Duration::from_secs(10);

const PROVIDER: &str = "mailgun";
const DELIVERABLE: &str = "deliverable";

#[derive(Debug, Clone)]
pub struct MailgunConfig {
    pub api_url: String,
    pub timeout: Duration,
}

impl Default for MailgunConfig {
    fn default() -> Self {
        Self {
            api_url: MAILGUN_API_URL.to_string(),
            timeout: MAILGUN_TIMEOUT,
        }
    }
}

/// Mailgun provider
pub struct MailgunProvider {
    config: MailgunConfig,
    client: Client,
}

impl MailgunProvider {
    pub fn new(config: MailgunConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build Mailgun client, using defaults");
                Client::new()
            });

        Self { config, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        token: &ApiToken,
    ) -> Result<Response, ProviderError> {
        let response = request
            .basic_auth("api", Some(token.expose()))
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, self.config.timeout, e))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, error = %body, "Mailgun API error");
            Err(ProviderError::from_status(PROVIDER, status, body))
        }
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, ProviderError> {
        response.json().await.map_err(|e| ProviderError::Transport {
            provider: PROVIDER,
            message: format!("invalid response body: {e}"),
        })
    }
}

impl Default for MailgunProvider {
    fn default() -> Self {
        Self::new(MailgunConfig::default())
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    #[serde(default)]
    result: String,
}

#[async_trait]
impl MailProvider for MailgunProvider {
    async fn send(&self, token: &ApiToken, envelope: &Envelope) -> Result<String, SendFailure> {
        let domain = sender_domain(&envelope.from)?;

        let form = [
            ("from", envelope.from.as_str()),
            ("to", envelope.to.as_str()),
            ("subject", envelope.subject.as_str()),
            ("text", envelope.body.as_str()),
        ];

        debug!(to = %envelope.to, domain = %domain, "Sending email via Mailgun");

        let request = self
            .client
            .post(self.url(&format!("v3/{domain}/messages")))
            .form(&form);
        let response = self.execute(request, token).await?;
        let sent: SendResponse = Self::decode(response).await?;

        debug!(message_id = %sent.id, "Email queued by Mailgun");
        Ok(sent.id)
    }

    async fn verify(&self, token: &ApiToken, sender_email: &str) -> Result<(), ProviderError> {
        let request = self
            .client
            .get(self.url("v4/address/validate"))
            .query(&[("address", sender_email)]);
        let response = self.execute(request, token).await?;
        let validation: ValidationResponse = Self::decode(response).await?;

        if validation.result == DELIVERABLE {
            Ok(())
        } else {
            Err(ProviderError::InvalidAddress {
                address: sender_email.to_string(),
                result: validation.result,
            })
        }
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }
}
