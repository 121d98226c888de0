//! Provider registry keyed by case-folded provider name.

use crate::error::{EmailError, EmailResult};
use crate::provider::{
    MailProvider, MailerSendConfig, MailerSendProvider, MailgunConfig, MailgunProvider,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Adapter settings for [`ProviderRegistry::with_defaults`]
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub mailersend: MailerSendConfig,
    pub mailgun: MailgunConfig,
}

/// Maps provider names to adapters.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn MailProvider>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `mailersend` and `mailgun`
    pub fn with_defaults(settings: ProviderSettings) -> Self {
        Self::new()
            .with_provider("mailersend", Arc::new(MailerSendProvider::new(settings.mailersend)))
            .with_provider("mailgun", Arc::new(MailgunProvider::new(settings.mailgun)))
    }

    pub fn with_provider(mut self, name: &str, provider: Arc<dyn MailProvider>) -> Self {
        self.register(name, provider);
        self
    }

    /// Register (or replace) an adapter.
    pub fn register(&mut self, name: &str, provider: Arc<dyn MailProvider>) {
        self.providers.insert(normalize(name), provider);
    }

    /// Look up the adapter for a configured provider name.
    pub fn resolve(&self, name: &str) -> EmailResult<Arc<dyn MailProvider>> {
        self.providers
            .get(&normalize(name))
            .cloned()
            .ok_or_else(|| EmailError::UnsupportedProvider(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
