//! Domain counters for dispatch and sender verification.

use metrics::counter;
use strum::{AsRefStr, Display};

/// Result label for dispatch and verification counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
    Unsupported,
}

/// Provider label when the configured name matched no adapter. Configured
/// names are user input and never become label values.
pub const UNSUPPORTED_PROVIDER: &str = "unsupported";

/// Count one Email dispatch attempt.
pub fn record_dispatch(provider: &'static str, outcome: Outcome) {
    counter!(
        "email_dispatch_total",
        "provider" => provider.to_string(),
        "result" => outcome.as_ref().to_string()
    )
    .increment(1);
}

/// Count one EmailSenderConfig verification.
pub fn record_verification(provider: &'static str, outcome: Outcome) {
    counter!(
        "email_sender_config_verifications_total",
        "provider" => provider.to_string(),
        "result" => outcome.as_ref().to_string()
    )
    .increment(1);
}
