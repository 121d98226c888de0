//! Watch events and per-controller event filters.

use crate::resource::{ObjectKey, Resource};
use strum::{AsRefStr, Display};

/// Kind of change carried by a [`WatchEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

/// A change notification emitted by an object store.
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    /// Object was created, or already existed when the watch started.
    Created(K),
    /// Object was written again (spec or status).
    Updated { old: K, new: K },
    /// Object was removed; carries its last known state.
    Deleted(K),
}

impl<K: Resource> WatchEvent<K> {
    pub fn kind(&self) -> EventKind {
        match self {
            WatchEvent::Created(_) => EventKind::Create,
            WatchEvent::Updated { .. } => EventKind::Update,
            WatchEvent::Deleted(_) => EventKind::Delete,
        }
    }

    /// Current state of the object (the new state for updates).
    pub fn object(&self) -> &K {
        match self {
            WatchEvent::Created(obj) | WatchEvent::Deleted(obj) => obj,
            WatchEvent::Updated { new, .. } => new,
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.object().key()
    }
}

/// Decides which watch events enqueue a reconcile.
///
/// Filtering happens before the work queue, so a rejected event never reaches
/// the reconciler. A controller that writes its own status should drop
/// updates, or every status write would trigger another reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    pub create: bool,
    pub update: bool,
    pub delete: bool,
}

impl EventFilter {
    pub const fn all() -> Self {
        Self {
            create: true,
            update: true,
            delete: true,
        }
    }

    pub const fn create_only() -> Self {
        Self {
            create: true,
            update: false,
            delete: false,
        }
    }

    pub const fn create_and_update() -> Self {
        Self {
            create: true,
            update: true,
            delete: false,
        }
    }

    pub fn accepts(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Create => self.create,
            EventKind::Update => self.update,
            EventKind::Delete => self.delete,
        }
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}
