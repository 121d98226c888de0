//! Declarative resource kinds: `Email` and `EmailSenderConfig`.

use reconcile_worker::{ObjectMeta, Resource};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Outcome of the last dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr)]
pub enum DeliveryStatus {
    #[default]
    Unset,
    Success,
    Failed,
}

/// A single email the user wants sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSpec {
    pub recipient_email: String,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    /// Name of an EmailSenderConfig in the same namespace
    pub sender_config_ref: String,
}

/// Observed delivery state, written only by the email controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailStatus {
    #[serde(default)]
    pub delivery_status: DeliveryStatus,

    /// Assigned on the first status write and never changed afterwards
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl EmailStatus {
    pub fn success(message_id: impl Into<String>) -> Self {
        Self {
            delivery_status: DeliveryStatus::Success,
            message_id: message_id.into(),
            error: String::new(),
        }
    }

    pub fn failed(message_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            delivery_status: DeliveryStatus::Failed,
            message_id: message_id.into(),
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub metadata: ObjectMeta,
    pub spec: EmailSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EmailStatus>,
}

impl Email {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: EmailSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: None,
        }
    }

    pub fn with_status(mut self, status: EmailStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn delivery_status(&self) -> DeliveryStatus {
        self.status
            .as_ref()
            .map(|s| s.delivery_status)
            .unwrap_or_default()
    }

    pub fn is_delivered(&self) -> bool {
        self.delivery_status() == DeliveryStatus::Success
    }

    /// Persisted message id, if one was ever assigned.
    pub fn message_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.message_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

impl Resource for Email {
    const KIND: &'static str = "Email";
    type Status = EmailStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> Option<&EmailStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: EmailStatus) {
        self.status = Some(status);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSenderConfigSpec {
    /// Provider name, matched case-insensitively (`mailersend`, `mailgun`)
    pub provider: String,
    pub sender_email: String,
    /// Name of a Secret in the same namespace holding the API token
    pub api_token_secret_ref: String,
}

/// Provider credentials and sender identity. Has no status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSenderConfig {
    pub metadata: ObjectMeta,
    pub spec: EmailSenderConfigSpec,
}

impl EmailSenderConfig {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: EmailSenderConfigSpec,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
        }
    }
}

impl Resource for EmailSenderConfig {
    const KIND: &'static str = "EmailSenderConfig";
    type Status = ();

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> Option<&()> {
        None
    }

    fn set_status(&mut self, _status: ()) {}
}
