//! Operator settings loaded from the environment.

use core_config::{
    ConfigError, Environment, FromEnv, ServerConfig, env_duration_secs, env_or_default, env_parse,
    env_parse_opt,
};
use email::provider::mailersend::{MAILERSEND_API_URL, MAILERSEND_TIMEOUT};
use email::provider::mailgun::{MAILGUN_API_URL, MAILGUN_TIMEOUT};
use email::{MailerSendConfig, MailgunConfig, ProviderSettings};

/// Allowed provider timeout range, in seconds
const MIN_PROVIDER_TIMEOUT_SECS: u64 = 5;
const MAX_PROVIDER_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    /// Workers for the Email controller
    pub email_concurrency: usize,
    /// Workers for the EmailSenderConfig controller
    pub sender_config_concurrency: usize,
    /// `None` retries retriable failures indefinitely
    pub max_retries: Option<u32>,
    pub providers: ProviderSettings,
}

impl FromEnv for OperatorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let email_concurrency = worker_count("EMAIL_CONTROLLER_CONCURRENCY", 4)?;
        let sender_config_concurrency = worker_count("SENDER_CONFIG_CONTROLLER_CONCURRENCY", 2)?;

        let providers = ProviderSettings {
            mailersend: MailerSendConfig {
                api_url: env_or_default("MAILERSEND_API_URL", MAILERSEND_API_URL),
                timeout: env_duration_secs(
                    "MAILERSEND_TIMEOUT_SECS",
                    MAILERSEND_TIMEOUT.as_secs(),
                    MIN_PROVIDER_TIMEOUT_SECS,
                    MAX_PROVIDER_TIMEOUT_SECS,
                )?,
            },
            mailgun: MailgunConfig {
                api_url: env_or_default("MAILGUN_API_URL", MAILGUN_API_URL),
                timeout: env_duration_secs(
                    "MAILGUN_TIMEOUT_SECS",
                    MAILGUN_TIMEOUT.as_secs(),
                    MIN_PROVIDER_TIMEOUT_SECS,
                    MAX_PROVIDER_TIMEOUT_SECS,
                )?,
            },
        };

        Ok(Self {
            environment: Environment::from_env(),
            server: ServerConfig::from_env()?,
            email_concurrency,
            sender_config_concurrency,
            max_retries: env_parse_opt("CONTROLLER_MAX_RETRIES")?,
            providers,
        })
    }
}

fn worker_count(key: &str, default: usize) -> Result<usize, ConfigError> {
    let count = env_parse(key, default)?;
    if count == 0 {
        return Err(ConfigError::OutOfRange {
            key: key.to_string(),
            details: "at least one worker is required".to_string(),
        });
    }
    Ok(count)
}
