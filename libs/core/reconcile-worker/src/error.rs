//! Reconcile error types and error categorization
//!
//! Errors are categorized to determine requeue behavior:
//! - **Transient**: temporary failure, requeue with exponential backoff
//! - **Conflict**: stale write, requeue quickly so the next run reloads
//! - **RateLimited**: remote side asked us to slow down, longer backoff
//! - **Permanent**: retrying cannot help, drop the key until the next event

use crate::resource::ObjectKey;
use strum::{AsRefStr, Display};
use thiserror::Error;

/// Category of error for determining requeue behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// Temporary failure - backoff 1s..30s
    Transient,
    /// Optimistic concurrency failure - backoff 100ms..5s
    Conflict,
    /// Rate limit hit - backoff 5s..120s
    RateLimited,
    /// Unrecoverable - never requeued
    Permanent,
}

impl ErrorCategory {
    /// Base delay in milliseconds for this category
    pub fn base_delay_ms(&self) -> u64 {
        match self {
            ErrorCategory::Transient => 1_000,
            ErrorCategory::Conflict => 100,
            ErrorCategory::RateLimited => 5_000,
            ErrorCategory::Permanent => 0,
        }
    }

    /// Maximum delay in milliseconds for this category
    pub fn max_delay_ms(&self) -> u64 {
        match self {
            ErrorCategory::Transient => 30_000,
            ErrorCategory::Conflict => 5_000,
            ErrorCategory::RateLimited => 120_000,
            ErrorCategory::Permanent => 0,
        }
    }

    /// Exponential backoff for the given number of previous failures
    pub fn backoff_delay_ms(&self, failures: u32) -> u64 {
        if *self == ErrorCategory::Permanent {
            return 0;
        }

        let delay = self
            .base_delay_ms()
            .saturating_mul(2u64.saturating_pow(failures));
        delay.min(self.max_delay_ms())
    }

    pub fn is_retriable(&self) -> bool {
        *self != ErrorCategory::Permanent
    }
}

/// Object store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    #[error(
        "{kind} {key} was modified concurrently (expected resourceVersion {expected}, found {actual})"
    )]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StoreError::NotFound { .. } => ErrorCategory::Transient,
            StoreError::AlreadyExists { .. } => ErrorCategory::Permanent,
            StoreError::Conflict { .. } => ErrorCategory::Conflict,
            StoreError::Unavailable(_) => ErrorCategory::Transient,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Error returned by a reconciler to the controller
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{message}")]
    Failed {
        message: String,
        category: ErrorCategory,
    },
}

impl ReconcileError {
    pub fn transient(message: impl Into<String>) -> Self {
        ReconcileError::Failed {
            message: message.into(),
            category: ErrorCategory::Transient,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ReconcileError::Failed {
            message: message.into(),
            category: ErrorCategory::Conflict,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        ReconcileError::Failed {
            message: message.into(),
            category: ErrorCategory::RateLimited,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ReconcileError::Failed {
            message: message.into(),
            category: ErrorCategory::Permanent,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ReconcileError::Store(e) => e.category(),
            ReconcileError::Failed { category, .. } => *category,
        }
    }

    /// Whether the key should be requeued after `failures` previous failures.
    ///
    /// `max_retries = None` means retriable errors are requeued indefinitely.
    pub fn should_retry(&self, failures: u32, max_retries: Option<u32>) -> bool {
        self.category().is_retriable() && max_retries.is_none_or(|max| failures < max)
    }

    pub fn backoff_delay_ms(&self, failures: u32) -> u64 {
        self.category().backoff_delay_ms(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        // Transient: 1s, 2s, 4s, ... capped at 30s
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(0), 1_000);
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(1), 2_000);
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(2), 4_000);
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(5), 30_000);

        // Conflict: 100ms, 200ms, ... capped at 5s
        assert_eq!(ErrorCategory::Conflict.backoff_delay_ms(0), 100);
        assert_eq!(ErrorCategory::Conflict.backoff_delay_ms(10), 5_000);

        // RateLimited: 5s, 10s, ... capped at 120s
        assert_eq!(ErrorCategory::RateLimited.backoff_delay_ms(1), 10_000);
        assert_eq!(ErrorCategory::RateLimited.backoff_delay_ms(8), 120_000);

        assert_eq!(ErrorCategory::Permanent.backoff_delay_ms(0), 0);
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(u32::MAX), 30_000);
    }

    #[test]
    fn test_store_error_categories() {
        let key = ObjectKey::new("default", "a");
        let conflict = StoreError::Conflict {
            kind: "Email",
            key: key.clone(),
            expected: 1,
            actual: 2,
        };
        assert_eq!(conflict.category(), ErrorCategory::Conflict);
        assert!(conflict.is_conflict());

        let missing = StoreError::NotFound { kind: "Email", key };
        assert_eq!(missing.category(), ErrorCategory::Transient);
        assert!(missing.to_string().contains("default/a"));
    }

    #[test]
    fn test_should_retry() {
        let transient = ReconcileError::transient("secret missing");
        assert!(transient.should_retry(0, None));
        assert!(transient.should_retry(100, None));
        assert!(transient.should_retry(2, Some(3)));
        assert!(!transient.should_retry(3, Some(3)));

        let permanent = ReconcileError::permanent("unsupported provider: postmark");
        assert!(!permanent.should_retry(0, None));
    }

    #[test]
    fn test_store_error_converts_with_category() {
        let err: ReconcileError = StoreError::Unavailable("connection reset".into()).into();
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(err.to_string().contains("connection reset"));
    }
}
