//! EmailSenderConfig reconciler: verifies that the configured credentials can
//! send as the configured sender. The result is logged and counted, never
//! written back.

use super::log_lookup_failure;
use crate::error::EmailError;
use crate::metrics::{Outcome, UNSUPPORTED_PROVIDER, record_verification};
use crate::provider::verify_with_timeout;
use crate::registry::ProviderRegistry;
use crate::resources::EmailSenderConfig;
use crate::secrets::SecretResolver;
use async_trait::async_trait;
use reconcile_worker::{Action, EventFilter, ObjectKey, ObjectReader, ReconcileError, Reconciler};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct SenderConfigReconciler {
    configs: Arc<dyn ObjectReader<EmailSenderConfig>>,
    secrets: SecretResolver,
    registry: Arc<ProviderRegistry>,
}

impl SenderConfigReconciler {
    pub fn new(
        configs: Arc<dyn ObjectReader<EmailSenderConfig>>,
        secrets: SecretResolver,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            configs,
            secrets,
            registry,
        }
    }
}

#[async_trait]
impl Reconciler<EmailSenderConfig> for SenderConfigReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let Some(config) = self.configs.get(key).await? else {
            debug!("EmailSenderConfig not found, assuming deleted");
            return Ok(Action::Done);
        };
        let spec = &config.spec;

        let token = self
            .secrets
            .resolve_token(&key.namespace, &spec.api_token_secret_ref)
            .await
            .map_err(|e| log_lookup_failure(e, "API token"))?;

        let provider = match self.registry.resolve(&spec.provider) {
            Ok(provider) => provider,
            Err(e) => {
                error!(error = %e, "Cannot verify EmailSenderConfig");
                record_verification(UNSUPPORTED_PROVIDER, Outcome::Unsupported);
                return Ok(Action::Done);
            }
        };

        match verify_with_timeout(provider.as_ref(), &token, &spec.sender_email).await {
            Ok(()) => {
                info!(
                    provider = provider.name(),
                    sender = %spec.sender_email,
                    "EmailSenderConfig verified"
                );
                record_verification(provider.name(), Outcome::Success);
                Ok(Action::Done)
            }
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    sender = %spec.sender_email,
                    error = %e,
                    "EmailSenderConfig verification failed"
                );
                record_verification(provider.name(), Outcome::Failed);
                Err(EmailError::from(e).into())
            }
        }
    }

    fn name(&self) -> &'static str {
        "sender-config"
    }

    fn event_filter(&self) -> EventFilter {
        EventFilter::create_and_update()
    }
}
