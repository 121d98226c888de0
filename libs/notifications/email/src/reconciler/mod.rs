//! Reconcilers for the email resource kinds.

mod email;
mod sender_config;

pub use email::{EmailReconciler, select_message_id};
pub use sender_config::SenderConfigReconciler;

use crate::error::EmailError;
use tracing::{Level, error, warn};

/// Broken references heal once the missing object is created; anything else
/// is a store fault.
fn lookup_failure_level(e: &EmailError) -> Level {
    if e.is_reference_error() {
        Level::WARN
    } else {
        Level::ERROR
    }
}

/// Log a failed config or secret lookup and hand the error back.
fn log_lookup_failure(e: EmailError, target: &'static str) -> EmailError {
    if lookup_failure_level(&e) == Level::WARN {
        warn!(error = %e, "Failed to resolve {target}");
    } else {
        error!(error = %e, "Failed to resolve {target}");
    }
    e
}
