//! Error types for email dispatch.

use crate::provider::ProviderError;
use reconcile_worker::{ErrorCategory, ObjectKey, ReconcileError, StoreError};
use thiserror::Error;

/// Result type for email operations.
pub type EmailResult<T> = Result<T, EmailError>;

/// Errors raised while reconciling Email and EmailSenderConfig objects.
#[derive(Debug, Error)]
pub enum EmailError {
    /// Referenced EmailSenderConfig does not exist
    #[error("EmailSenderConfig {0} not found")]
    SenderConfigNotFound(ObjectKey),

    /// Referenced Secret does not exist
    #[error("Secret {0} not found")]
    SecretNotFound(ObjectKey),

    /// Secret exists but has no usable value under the expected key
    #[error("Secret {secret} has no {key:?} entry")]
    SecretKeyMissing { secret: ObjectKey, key: &'static str },

    /// No adapter registered for the configured provider name
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EmailError {
    /// Requeue category when this error is returned to the controller.
    pub fn category(&self) -> ErrorCategory {
        match self {
            EmailError::SenderConfigNotFound(_)
            | EmailError::SecretNotFound(_)
            | EmailError::SecretKeyMissing { .. } => ErrorCategory::Transient,
            EmailError::UnsupportedProvider(_) => ErrorCategory::Permanent,
            EmailError::Provider(e) => e.category(),
            EmailError::Store(e) => e.category(),
        }
    }

    /// Broken reference to a config or secret.
    pub fn is_reference_error(&self) -> bool {
        matches!(
            self,
            EmailError::SenderConfigNotFound(_)
                | EmailError::SecretNotFound(_)
                | EmailError::SecretKeyMissing { .. }
        )
    }
}

impl From<EmailError> for ReconcileError {
    fn from(err: EmailError) -> Self {
        match err {
            EmailError::Store(e) => ReconcileError::Store(e),
            other => ReconcileError::Failed {
                category: other.category(),
                message: other.to_string(),
            },
        }
    }
}
