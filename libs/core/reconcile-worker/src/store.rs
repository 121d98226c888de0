//! Object store abstraction and the in-memory reference store.
//!
//! Controllers only see two narrow traits:
//! - `ObjectReader` - point reads, listing and watching
//! - `StatusWriter` - compare-and-swap status writes
//!
//! A reconciler that must not mutate a kind is simply not given a
//! `StatusWriter` for it.

use crate::error::StoreError;
use crate::event::WatchEvent;
use crate::resource::{ObjectKey, Resource};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default capacity of the watch fan-out channel.
const DEFAULT_WATCH_CAPACITY: usize = 1024;

/// Read side of an object store
#[async_trait]
pub trait ObjectReader<K: Resource>: Send + Sync {
    /// Fetch the current state of an object, `None` if it does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;

    /// All objects of this kind.
    async fn list(&self) -> Result<Vec<K>, StoreError>;

    /// Stream of changes.
    ///
    /// The stream starts by replaying every existing object as
    /// [`WatchEvent::Created`], then yields live changes in commit order.
    /// A stream that ends must be watched again; the new stream replays
    /// the current objects.
    async fn watch(&self) -> Result<BoxStream<'static, WatchEvent<K>>, StoreError>;
}

/// Status sub-resource writer
#[async_trait]
pub trait StatusWriter<K: Resource>: Send + Sync {
    /// Persist `object`'s status.
    ///
    /// The write succeeds only if `object`'s resourceVersion still matches
    /// the stored one; otherwise it fails with [`StoreError::Conflict`] and the
    /// caller must reload before trying again. Spec and metadata in `object`
    /// are ignored.
    async fn update_status(&self, object: &K) -> Result<K, StoreError>;
}

struct State<K> {
    objects: BTreeMap<ObjectKey, K>,
    revision: u64,
}

impl<K> State<K> {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// Thread-safe in-memory object store with watch support.
///
/// Resource versions come from a store-wide revision counter, so they are
/// unique and increase with every write. Events are published while the write
/// lock is held, which keeps per-key event order identical to commit order.
///
/// A watcher that falls more than the watch capacity behind is sent every
/// current object again as [`WatchEvent::Created`], so no live object is
/// missed. Deletions that happened during the gap are not replayed.
pub struct InMemoryStore<K: Resource> {
    state: Arc<RwLock<State<K>>>,
    events: broadcast::Sender<WatchEvent<K>>,
}

impl<K: Resource> InMemoryStore<K> {
    pub fn new() -> Self {
        Self::with_watch_capacity(DEFAULT_WATCH_CAPACITY)
    }

    /// Create a store whose watchers may fall `capacity` events behind
    /// before they start missing events.
    pub fn with_watch_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Arc::new(RwLock::new(State {
                objects: BTreeMap::new(),
                revision: 0,
            })),
            events,
        }
    }

    fn publish(&self, event: WatchEvent<K>) {
        // No receivers simply means no controller is watching yet.
        let _ = self.events.send(event);
    }

    /// Create a new object.
    ///
    /// Assigns uid, resourceVersion, generation 1 and the creation timestamp.
    pub async fn create(&self, mut object: K) -> Result<K, StoreError> {
        let key = object.key();
        let mut state = self.state.write().await;

        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: K::KIND, key });
        }

        let revision = state.next_revision();
        let meta = object.meta_mut();
        meta.uid = Uuid::new_v4().to_string();
        meta.resource_version = revision;
        meta.generation = 1;
        meta.creation_timestamp = Some(Utc::now());

        state.objects.insert(key.clone(), object.clone());
        debug!(kind = K::KIND, object = %key, revision, "Object created");
        self.publish(WatchEvent::Created(object.clone()));

        Ok(object)
    }

    /// Replace an object's spec.
    ///
    /// A non-zero resourceVersion on `object` must match the stored one; zero
    /// means an unconditional replace. The stored status and identity
    /// metadata are preserved and generation is bumped.
    pub async fn update(&self, mut object: K) -> Result<K, StoreError> {
        let key = object.key();
        let mut state = self.state.write().await;

        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: K::KIND,
                key: key.clone(),
            })?;

        let expected = object.resource_version();
        if expected != 0 && expected != stored.resource_version() {
            return Err(StoreError::Conflict {
                kind: K::KIND,
                key,
                expected,
                actual: stored.resource_version(),
            });
        }

        if let Some(status) = stored.status() {
            object.set_status(status.clone());
        }

        let revision = state.next_revision();
        let meta = object.meta_mut();
        meta.uid = stored.meta().uid.clone();
        meta.creation_timestamp = stored.meta().creation_timestamp;
        meta.generation = stored.meta().generation + 1;
        meta.resource_version = revision;

        state.objects.insert(key.clone(), object.clone());
        debug!(kind = K::KIND, object = %key, revision, "Object updated");
        self.publish(WatchEvent::Updated {
            old: stored,
            new: object.clone(),
        });

        Ok(object)
    }

    /// Delete an object, returning its last state.
    pub async fn delete(&self, key: &ObjectKey) -> Result<K, StoreError> {
        let mut state = self.state.write().await;

        let removed = state
            .objects
            .remove(key)
            .ok_or_else(|| StoreError::NotFound {
                kind: K::KIND,
                key: key.clone(),
            })?;

        state.next_revision();
        debug!(kind = K::KIND, object = %key, "Object deleted");
        self.publish(WatchEvent::Deleted(removed.clone()));

        Ok(removed)
    }

    /// Objects in one namespace, ordered by name.
    pub async fn list_namespace(&self, namespace: &str) -> Vec<K> {
        self.state
            .read()
            .await
            .objects
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(_, obj)| obj.clone())
            .collect()
    }
}

impl<K: Resource> Default for InMemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: Resource> ObjectReader<K> for InMemoryStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        Ok(self.state.read().await.objects.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<K>, StoreError> {
        Ok(self.state.read().await.objects.values().cloned().collect())
    }

    async fn watch(&self) -> Result<BoxStream<'static, WatchEvent<K>>, StoreError> {
        // Subscribe while holding the lock so no commit can fall between the
        // snapshot and the live stream.
        let state = self.state.read().await;
        let receiver = self.events.subscribe();
        let initial: Vec<WatchEvent<K>> = state
            .objects
            .values()
            .cloned()
            .map(WatchEvent::Created)
            .collect();
        drop(state);

        let relist_from = Arc::clone(&self.state);
        let live = BroadcastStream::new(receiver)
            .then(move |item| {
                let state = Arc::clone(&relist_from);
                async move {
                    match item {
                        Ok(event) => vec![event],
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            let relisted: Vec<WatchEvent<K>> = state
                                .read()
                                .await
                                .objects
                                .values()
                                .cloned()
                                .map(WatchEvent::Created)
                                .collect();
                            warn!(
                                kind = K::KIND,
                                skipped,
                                relisted = relisted.len(),
                                "Watcher lagged, relisting current objects"
                            );
                            relisted
                        }
                    }
                }
            })
            .flat_map(stream::iter);

        Ok(stream::iter(initial).chain(live).boxed())
    }
}

#[async_trait]
impl<K: Resource> StatusWriter<K> for InMemoryStore<K> {
    async fn update_status(&self, object: &K) -> Result<K, StoreError> {
        let key = object.key();
        let mut state = self.state.write().await;

        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: K::KIND,
                key: key.clone(),
            })?;

        if object.resource_version() != stored.resource_version() {
            return Err(StoreError::Conflict {
                kind: K::KIND,
                key,
                expected: object.resource_version(),
                actual: stored.resource_version(),
            });
        }

        let mut updated = stored.clone();
        if let Some(status) = object.status() {
            updated.set_status(status.clone());
        }
        updated.meta_mut().resource_version = state.next_revision();

        state.objects.insert(key.clone(), updated.clone());
        debug!(kind = K::KIND, object = %key, "Status updated");
        self.publish(WatchEvent::Updated {
            old: stored,
            new: updated.clone(),
        });

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::testing::Widget;
    use std::collections::BTreeSet;
    use std::time::Duration;

    #[tokio::test]
    async fn test_create_assigns_metadata() {
        let store = InMemoryStore::new();
        let created = store.create(Widget::new("a", 1)).await.unwrap();

        assert!(!created.metadata.uid.is_empty());
        assert_eq!(created.metadata.generation, 1);
        assert!(created.metadata.resource_version > 0);
        assert!(created.metadata.creation_timestamp.is_some());

        let err = store.create(Widget::new("a", 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_status_write_rejects_stale_version() {
        let store = InMemoryStore::new();
        let created = store.create(Widget::new("a", 1)).await.unwrap();

        let mut first = created.clone();
        first.status = Some("ready".into());
        let written = store.update_status(&first).await.unwrap();
        assert_eq!(written.status.as_deref(), Some("ready"));
        assert!(written.metadata.resource_version > created.metadata.resource_version);
        assert_eq!(written.metadata.generation, 1);

        // Second writer still holds the original version.
        let mut stale = created;
        stale.status = Some("broken".into());
        let err = store.update_status(&stale).await.unwrap_err();
        assert!(err.is_conflict());

        let current = store.get(&written.key()).await.unwrap().unwrap();
        assert_eq!(current.status.as_deref(), Some("ready"));
    }

    #[tokio::test]
    async fn test_status_write_ignores_spec_changes() {
        let store = InMemoryStore::new();
        let mut widget = store.create(Widget::new("a", 1)).await.unwrap();
        widget.size = 99;
        widget.status = Some("ready".into());

        let written = store.update_status(&widget).await.unwrap();
        assert_eq!(written.size, 1);
    }

    #[tokio::test]
    async fn test_update_preserves_status_and_bumps_generation() {
        let store = InMemoryStore::new();
        let mut widget = store.create(Widget::new("a", 1)).await.unwrap();
        widget.status = Some("ready".into());
        let widget = store.update_status(&widget).await.unwrap();

        let mut edit = widget.clone();
        edit.size = 5;
        edit.status = None;
        let updated = store.update(edit).await.unwrap();

        assert_eq!(updated.size, 5);
        assert_eq!(updated.status.as_deref(), Some("ready"));
        assert_eq!(updated.metadata.generation, 2);
        assert_eq!(updated.metadata.uid, widget.metadata.uid);
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let store = InMemoryStore::new();
        let created = store.create(Widget::new("a", 1)).await.unwrap();
        store.update(created.clone()).await.unwrap();

        let err = store.update(created).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_watch_replays_then_streams() {
        let store = InMemoryStore::new();
        store.create(Widget::new("existing", 1)).await.unwrap();

        let mut events = store.watch().await.unwrap();

        let replayed = events.next().await.unwrap();
        assert_eq!(replayed.kind(), EventKind::Create);
        assert_eq!(replayed.object().metadata.name, "existing");

        let fresh = store.create(Widget::new("fresh", 2)).await.unwrap();
        let mut with_status = fresh.clone();
        with_status.status = Some("ready".into());
        store.update_status(&with_status).await.unwrap();
        store.delete(&fresh.key()).await.unwrap();

        let kinds: Vec<EventKind> = vec![
            events.next().await.unwrap().kind(),
            events.next().await.unwrap().kind(),
            events.next().await.unwrap().kind(),
        ];
        assert_eq!(
            kinds,
            vec![EventKind::Create, EventKind::Update, EventKind::Delete]
        );
    }

    #[tokio::test]
    async fn test_lagged_watcher_sees_every_object() {
        let store = InMemoryStore::with_watch_capacity(8);
        let mut events = store.watch().await.unwrap();

        // Nothing reads the stream while these commit, so it falls behind.
        for i in 0..40 {
            store.create(Widget::new(&format!("w{i}"), i)).await.unwrap();
        }

        let mut created = BTreeSet::new();
        while created.len() < 40 {
            let event = tokio::time::timeout(Duration::from_secs(1), events.next())
                .await
                .expect("watch stalled")
                .expect("watch ended");
            if event.kind() == EventKind::Create {
                created.insert(event.object().metadata.name.clone());
            }
        }

        let stored: BTreeSet<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.metadata.name)
            .collect();
        assert_eq!(created, stored);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store: InMemoryStore<Widget> = InMemoryStore::new();
        let err = store
            .delete(&ObjectKey::new("default", "ghost"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_namespace() {
        let store = InMemoryStore::new();
        store.create(Widget::new("a", 1)).await.unwrap();
        let mut other = Widget::new("b", 1);
        other.metadata.namespace = "other".into();
        store.create(other).await.unwrap();

        assert_eq!(store.list_namespace("default").await.len(), 1);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}
