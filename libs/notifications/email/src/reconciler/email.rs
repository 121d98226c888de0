//! Email reconciler: at most one dispatch per Email, then a status write.

use super::log_lookup_failure;
use crate::error::{EmailError, EmailResult};
use crate::metrics::{Outcome, UNSUPPORTED_PROVIDER, record_dispatch};
use crate::provider::{Envelope, send_with_timeout};
use crate::registry::ProviderRegistry;
use crate::resources::{Email, EmailSenderConfig, EmailStatus};
use crate::secrets::SecretResolver;
use async_trait::async_trait;
use reconcile_worker::{
    Action, EventFilter, ObjectKey, ObjectReader, ReconcileError, Reconciler, StatusWriter,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Dispatches newly created Emails through the provider named by their
/// EmailSenderConfig.
///
/// Only creation events trigger a run. To send again, recreate the object.
pub struct EmailReconciler {
    emails: Arc<dyn ObjectReader<Email>>,
    status: Arc<dyn StatusWriter<Email>>,
    configs: Arc<dyn ObjectReader<EmailSenderConfig>>,
    secrets: SecretResolver,
    registry: Arc<ProviderRegistry>,
}

impl EmailReconciler {
    pub fn new(
        emails: Arc<dyn ObjectReader<Email>>,
        status: Arc<dyn StatusWriter<Email>>,
        configs: Arc<dyn ObjectReader<EmailSenderConfig>>,
        secrets: SecretResolver,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            emails,
            status,
            configs,
            secrets,
            registry,
        }
    }

    async fn sender_config(&self, email: &Email) -> EmailResult<EmailSenderConfig> {
        let config_key = email.metadata.key().sibling(&email.spec.sender_config_ref);
        self.configs
            .get(&config_key)
            .await?
            .ok_or(EmailError::SenderConfigNotFound(config_key))
    }

    async fn write_status(&self, email: &Email, status: EmailStatus) -> Result<(), ReconcileError> {
        let mut updated = email.clone();
        updated.status = Some(status);

        self.status.update_status(&updated).await.map_err(|e| {
            warn!(error = %e, "Failed to write Email status");
            ReconcileError::from(e)
        })?;
        Ok(())
    }
}

/// Message id for a status write.
///
/// A persisted id always wins; otherwise the provider's id, otherwise the id
/// seeded at the start of the cycle.
pub fn select_message_id(persisted: Option<&str>, returned: Option<&str>, seeded: &str) -> String {
    persisted
        .or(returned.filter(|id| !id.is_empty()))
        .unwrap_or(seeded)
        .to_string()
}

#[async_trait]
impl Reconciler<Email> for EmailReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let Some(email) = self.emails.get(key).await? else {
            debug!("Email not found, assuming deleted");
            return Ok(Action::Done);
        };

        if email.is_delivered() {
            debug!(message_id = ?email.message_id(), "Email already delivered, skipping");
            return Ok(Action::Done);
        }

        let seeded = email
            .message_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let config = self
            .sender_config(&email)
            .await
            .map_err(|e| log_lookup_failure(e, "EmailSenderConfig"))?;

        let token = self
            .secrets
            .resolve_token(&key.namespace, &config.spec.api_token_secret_ref)
            .await
            .map_err(|e| log_lookup_failure(e, "API token"))?;

        let provider = match self.registry.resolve(&config.spec.provider) {
            Ok(provider) => provider,
            Err(e) => {
                error!(
                    error = %e,
                    sender_config = %config.metadata.name,
                    "Cannot dispatch Email"
                );
                record_dispatch(UNSUPPORTED_PROVIDER, Outcome::Unsupported);
                let message_id = select_message_id(email.message_id(), None, &seeded);
                self.write_status(&email, EmailStatus::failed(message_id, e.to_string()))
                    .await?;
                return Ok(Action::Done);
            }
        };

        let envelope = Envelope {
            from: config.spec.sender_email.clone(),
            to: email.spec.recipient_email.clone(),
            subject: email.spec.subject.clone(),
            body: email.spec.body.clone(),
        };

        let status = match send_with_timeout(provider.as_ref(), &token, &envelope).await {
            Ok(returned) => {
                let message_id = select_message_id(email.message_id(), Some(&returned), &seeded);
                info!(
                    provider = provider.name(),
                    recipient = %envelope.to,
                    message_id = %message_id,
                    "Email sent"
                );
                record_dispatch(provider.name(), Outcome::Success);
                EmailStatus::success(message_id)
            }
            Err(failure) => {
                let message_id = select_message_id(
                    email.message_id(),
                    failure.message_id.as_deref(),
                    &seeded,
                );
                warn!(
                    provider = provider.name(),
                    recipient = %envelope.to,
                    error = %failure,
                    "Email dispatch failed"
                );
                record_dispatch(provider.name(), Outcome::Failed);
                EmailStatus::failed(message_id, failure.to_string())
            }
        };

        self.write_status(&email, status).await?;
        Ok(Action::Done)
    }

    fn name(&self) -> &'static str {
        "email"
    }

    fn event_filter(&self) -> EventFilter {
        EventFilter::create_only()
    }
}
