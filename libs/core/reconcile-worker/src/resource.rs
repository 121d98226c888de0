//! Resource identity and metadata.
//!
//! This module provides:
//! - `ObjectKey` - namespace/name pair used as the reconcile key
//! - `ObjectMeta` - bookkeeping shared by every stored object
//! - `Resource` trait implemented by each declarative object kind

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespaced name of an object.
///
/// This is the unit the work queue deduplicates and serializes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a sibling object referenced by name from this one.
    ///
    /// References never cross namespaces.
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata maintained by the object store.
///
/// Callers set `name` and `namespace`; the store owns the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    pub namespace: String,

    /// Unique per object incarnation; a recreated object gets a new uid.
    #[serde(default)]
    pub uid: String,

    /// Bumped on every write. Writes carrying a stale value are rejected.
    #[serde(default)]
    pub resource_version: u64,

    /// Bumped on spec changes only, never on status writes.
    #[serde(default)]
    pub generation: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// A declarative object kind that controllers can watch.
///
/// # Example
///
/// ```rust,ignore
/// impl Resource for Email {
///     const KIND: &'static str = "Email";
///     type Status = EmailStatus;
///
///     fn meta(&self) -> &ObjectMeta { &self.metadata }
///     fn meta_mut(&mut self) -> &mut ObjectMeta { &mut self.metadata }
///     fn status(&self) -> Option<&EmailStatus> { self.status.as_ref() }
///     fn set_status(&mut self, status: EmailStatus) { self.status = Some(status) }
/// }
/// ```
pub trait Resource: Clone + Send + Sync + 'static {
    /// Kind name used in logs and metrics labels.
    const KIND: &'static str;

    /// Observed state written by controllers. Use `()` for kinds without one.
    type Status: Clone + Send + Sync + 'static;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn status(&self) -> Option<&Self::Status>;

    fn set_status(&mut self, status: Self::Status);

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }

    fn resource_version(&self) -> u64 {
        self.meta().resource_version
    }
}
