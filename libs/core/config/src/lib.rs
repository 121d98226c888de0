//! Shared environment-driven configuration for the mail operator workspace.
//!
//! Every binary and library reads its settings through the [`FromEnv`] trait so
//! configuration stays uniform: defaults live next to the type, and parse
//! failures name the offending variable.

pub mod server;
pub mod tracing;

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use server::ServerConfig;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("Environment variable '{key}' is out of range: {details}")]
    OutOfRange { key: String, details: String },
}

/// Deployment environment, selected with `APP_ENV`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    /// Local runs and kind clusters: pretty logs, verbose filters.
    Development,
    /// Cluster deployments: JSON logs for aggregation.
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env_or_default("APP_ENV", "development");

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Read `key`, falling back to `default` when it is unset
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read `key` or fail with [`ConfigError::MissingEnvVar`]
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Read and parse `key`, using `default` when it is unset.
///
/// A value that is present but unparsable is an error rather than a silent
/// fallback to the default.
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Read an optional value; unset yields `None`, unparsable yields an error.
pub fn env_parse_opt<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::ParseError {
                key: key.to_string(),
                details: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

/// Read a whole number of seconds and check it lies within `min..=max`.
pub fn env_duration_secs(
    key: &str,
    default_secs: u64,
    min_secs: u64,
    max_secs: u64,
) -> Result<Duration, ConfigError> {
    let secs: u64 = env_parse(key, default_secs)?;
    if !(min_secs..=max_secs).contains(&secs) {
        return Err(ConfigError::OutOfRange {
            key: key.to_string(),
            details: format!("{}s is outside {}s..={}s", secs, min_secs, max_secs),
        });
    }
    Ok(Duration::from_secs(secs))
}
