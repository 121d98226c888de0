//! Declarative email dispatch
//!
//! Users create `Email` and `EmailSenderConfig` objects; two reconcilers drive
//! them through pluggable mail providers.
//!
//! ## Components
//!
//! - **Resources**: `Email` (desired send + delivery status), `EmailSenderConfig`
//! - **Secrets**: `SecretStore` lookup and `SecretResolver` for API tokens
//! - **Providers**: MailerSend, Mailgun, and Mock behind `MailProvider`
//! - **Registry**: case-insensitive provider name to adapter mapping
//! - **Reconcilers**: `EmailReconciler` (dispatch once, record status) and
//!   `SenderConfigReconciler` (verify credentials)
//!
//! ## Flow
//!
//! ```text
//! Email created ─► EmailReconciler ─► EmailSenderConfig ─► Secret "token"
//!                        │
//!                        ▼
//!               ProviderRegistry ─► MailProvider::send ─► status write
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use email::{EmailReconciler, ProviderRegistry, ProviderSettings, SecretResolver};
//! use reconcile_worker::{Controller, ControllerConfig};
//!
//! let registry = Arc::new(ProviderRegistry::with_defaults(ProviderSettings::default()));
//! let reconciler = EmailReconciler::new(emails.clone(), emails, configs, secrets, registry);
//! let controller = Controller::new(source, reconciler, ControllerConfig::new("email"));
//! controller.run(shutdown_rx).await?;
//! ```

pub mod error;
pub mod metrics;
pub mod provider;
pub mod reconciler;
pub mod registry;
pub mod resources;
pub mod secrets;

// Re-export main types
pub use error::{EmailError, EmailResult};
pub use provider::{
    Envelope, MailProvider, MailerSendConfig, MailerSendProvider, MailgunConfig, MailgunProvider,
    MockProvider, ProviderError, SendFailure,
};
pub use reconciler::{EmailReconciler, SenderConfigReconciler};
pub use registry::{ProviderRegistry, ProviderSettings};
pub use resources::{
    DeliveryStatus, Email, EmailSenderConfig, EmailSenderConfigSpec, EmailSpec, EmailStatus,
};
pub use secrets::{ApiToken, Secret, SecretResolver, SecretStore, TOKEN_KEY};
