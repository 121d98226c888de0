//! Reconciler trait and the generic Controller loop.
//!
//! This module provides:
//! - `Reconciler` trait implemented by domain controllers
//! - `Action` returned by a successful reconcile
//! - `Controller` which wires a watch stream, a work queue and N workers

use crate::config::ControllerConfig;
use crate::error::ReconcileError;
use crate::event::{EventFilter, WatchEvent};
use crate::metrics::ControllerMetrics;
use crate::queue::WorkQueue;
use crate::resource::{ObjectKey, Resource};
use crate::store::ObjectReader;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Pause before watching again after a watch stream ends or fails to open.
const REWATCH_DELAY: Duration = Duration::from_millis(500);

/// What the controller should do with a key after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Converged; wait for the next event.
    Done,
    /// Reconcile again after the given delay.
    Requeue(Duration),
}

/// Domain logic driven by a [`Controller`].
///
/// A reconciler receives only the key of the object that changed. It must
/// fetch the current state itself, since the event that triggered it may be
/// stale by the time it runs.
///
/// # Example
///
/// ```rust,ignore
/// struct EmailReconciler { /* stores, registry */ }
///
/// #[async_trait]
/// impl Reconciler<Email> for EmailReconciler {
///     async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
///         // load, dispatch, write status
///         Ok(Action::Done)
///     }
///
///     fn name(&self) -> &'static str {
///         "email"
///     }
///
///     fn event_filter(&self) -> EventFilter {
///         EventFilter::create_only()
///     }
/// }
/// ```
#[async_trait]
pub trait Reconciler<K: Resource>: Send + Sync {
    /// Drive the object named by `key` towards its desired state.
    ///
    /// Retriable errors requeue the key with backoff; permanent errors drop it
    /// until the next accepted event.
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError>;

    /// Reconciler name for logging.
    fn name(&self) -> &'static str;

    /// Events that should trigger a reconcile. Default: all of them.
    fn event_filter(&self) -> EventFilter {
        EventFilter::all()
    }
}

/// Runs a [`Reconciler`] against the watch stream of one resource kind.
///
/// Keys are deduplicated in a [`WorkQueue`], so each object has at most one
/// reconcile in flight while distinct objects are processed by up to
/// `max_concurrent_reconciles` workers in parallel.
pub struct Controller<K, R>
where
    K: Resource,
    R: Reconciler<K>,
{
    source: Arc<dyn ObjectReader<K>>,
    reconciler: Arc<R>,
    config: ControllerConfig,
    queue: Arc<WorkQueue>,
    metrics: ControllerMetrics,
}

impl<K, R> Controller<K, R>
where
    K: Resource,
    R: Reconciler<K> + 'static,
{
    pub fn new(source: Arc<dyn ObjectReader<K>>, reconciler: R, config: ControllerConfig) -> Self {
        Self::with_arc_reconciler(source, Arc::new(reconciler), config)
    }

    pub fn with_arc_reconciler(
        source: Arc<dyn ObjectReader<K>>,
        reconciler: Arc<R>,
        config: ControllerConfig,
    ) -> Self {
        let metrics = ControllerMetrics::new(config.name.clone(), K::KIND);
        Self {
            source,
            reconciler,
            config,
            queue: Arc::new(WorkQueue::new()),
            metrics,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// On shutdown no new keys are handed out; in-flight reconciles get
    /// `shutdown_grace_period` to finish before they are aborted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ReconcileError> {
        let filter = self.reconciler.event_filter();

        info!(
            controller = %self.config.name,
            kind = K::KIND,
            reconciler = self.reconciler.name(),
            workers = self.config.max_concurrent_reconciles,
            ?filter,
            "Starting controller"
        );

        let events = self.source.watch().await?;
        let pump = tokio::spawn(pump_events(
            Arc::clone(&self.source),
            events,
            filter,
            Arc::clone(&self.queue),
            self.metrics.clone(),
        ));

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.max_concurrent_reconciles {
            let worker = Worker::<K, R> {
                id: worker_id,
                controller: self.config.name.clone(),
                queue: Arc::clone(&self.queue),
                reconciler: Arc::clone(&self.reconciler),
                metrics: self.metrics.clone(),
                max_retries: self.config.max_retries,
                _phantom: PhantomData,
            };
            workers.spawn(worker.run());
        }

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!(controller = %self.config.name, "Received shutdown signal, stopping controller");
        pump.abort();
        self.queue.shutdown().await;

        let drain = async { while workers.join_next().await.is_some() {} };
        if tokio::time::timeout(self.config.shutdown_grace_period, drain)
            .await
            .is_err()
        {
            warn!(
                controller = %self.config.name,
                grace_period = ?self.config.shutdown_grace_period,
                "In-flight reconciles did not finish in time, aborting"
            );
            workers.abort_all();
        }

        info!(controller = %self.config.name, "Controller stopped");
        Ok(())
    }
}

/// Feed accepted watch events into the queue.
///
/// Runs until aborted. An ended stream is replaced by a fresh watch, whose
/// replay re-enqueues every current object.
async fn pump_events<K: Resource>(
    source: Arc<dyn ObjectReader<K>>,
    mut events: BoxStream<'static, WatchEvent<K>>,
    filter: EventFilter,
    queue: Arc<WorkQueue>,
    metrics: ControllerMetrics,
) {
    loop {
        while let Some(event) = events.next().await {
            let kind = event.kind();
            let accepted = filter.accepts(kind);
            metrics.event_received(kind.as_ref(), accepted);

            if accepted {
                debug!(kind = K::KIND, object = %event.key(), event = %kind, "Event accepted");
                queue.add(event.key()).await;
            }
        }

        warn!(kind = K::KIND, "Watch stream ended, watching again");
        events = loop {
            tokio::time::sleep(REWATCH_DELAY).await;
            match source.watch().await {
                Ok(stream) => break stream,
                Err(e) => error!(kind = K::KIND, error = %e, "Failed to re-open watch"),
            }
        };
    }
}

struct Worker<K, R> {
    id: usize,
    controller: String,
    queue: Arc<WorkQueue>,
    reconciler: Arc<R>,
    metrics: ControllerMetrics,
    max_retries: Option<u32>,
    _phantom: PhantomData<fn() -> K>,
}

impl<K, R> Worker<K, R>
where
    K: Resource,
    R: Reconciler<K> + 'static,
{
    async fn run(self) {
        debug!(controller = %self.controller, worker_id = self.id, "Worker started");

        while let Some(key) = self.queue.next().await {
            self.metrics.in_flight(self.queue.in_flight().await);

            let span = info_span!(
                "reconcile",
                controller = %self.controller,
                kind = K::KIND,
                object = %key,
                worker_id = self.id
            );
            self.process(&key).instrument(span).await;

            self.queue.done(&key).await;
        }

        debug!(controller = %self.controller, worker_id = self.id, "Worker stopped");
    }

    async fn process(&self, key: &ObjectKey) {
        let started = Instant::now();
        let result = self.reconciler.reconcile(key).await;
        let elapsed = started.elapsed();

        match result {
            Ok(action) => {
                self.metrics.reconcile_succeeded(elapsed);
                self.queue.forget(key).await;

                if let Action::Requeue(delay) = action {
                    debug!(delay = ?delay, "Reconcile requested requeue");
                    self.metrics.requeued();
                    self.queue.add_after(key.clone(), delay);
                } else {
                    debug!(duration_ms = elapsed.as_millis() as u64, "Reconcile completed");
                }
            }
            Err(e) => {
                let category = e.category();
                self.metrics.reconcile_failed(category.as_ref(), elapsed);
                let failures = self.queue.record_failure(key).await;

                if e.should_retry(failures, self.max_retries) {
                    let delay = Duration::from_millis(e.backoff_delay_ms(failures));
                    warn!(
                        error = %e,
                        category = %category,
                        attempt = failures + 1,
                        backoff_ms = delay.as_millis() as u64,
                        "Reconcile failed, requeueing"
                    );
                    self.metrics.requeued();
                    self.queue.add_after(key.clone(), delay);
                } else {
                    error!(
                        error = %e,
                        category = %category,
                        attempt = failures + 1,
                        "Reconcile failed, dropping key"
                    );
                    self.metrics.dropped();
                    self.queue.forget(key).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::InMemoryStore;
    use crate::testing::Widget;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinHandle;

    /// Returns queued outcomes in order, then `Ok(Done)`.
    #[derive(Default)]
    struct ScriptedReconciler {
        outcomes: Mutex<VecDeque<Result<Action, ReconcileError>>>,
        filter: Option<EventFilter>,
        delay: Duration,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        seen: Mutex<Vec<ObjectKey>>,
    }

    impl ScriptedReconciler {
        fn with_outcomes(outcomes: Vec<Result<Action, ReconcileError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Reconciler<Widget> for ScriptedReconciler {
        async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.seen.lock().unwrap().push(key.clone());

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Action::Done));

            self.active.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            outcome
        }

        fn name(&self) -> &'static str {
            "scripted"
        }

        fn event_filter(&self) -> EventFilter {
            self.filter.unwrap_or_default()
        }
    }

    fn start(
        store: &Arc<InMemoryStore<Widget>>,
        reconciler: &Arc<ScriptedReconciler>,
        config: ControllerConfig,
    ) -> (watch::Sender<bool>, JoinHandle<Result<(), ReconcileError>>) {
        let source: Arc<dyn ObjectReader<Widget>> = store.clone();
        let controller = Controller::with_arc_reconciler(source, Arc::clone(reconciler), config);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { controller.run(rx).await });
        (tx, handle)
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    async fn stop(tx: watch::Sender<bool>, handle: JoinHandle<Result<(), ReconcileError>>) {
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reconciles_existing_and_new_objects() {
        let store = Arc::new(InMemoryStore::new());
        store.create(Widget::new("existing", 1)).await.unwrap();

        let reconciler = Arc::new(ScriptedReconciler::default());
        let (tx, handle) = start(&store, &reconciler, ControllerConfig::new("test"));

        store.create(Widget::new("fresh", 1)).await.unwrap();
        wait_for(|| reconciler.calls() == 2).await;

        let seen = reconciler.seen.lock().unwrap().clone();
        assert!(seen.contains(&ObjectKey::new("default", "existing")));
        assert!(seen.contains(&ObjectKey::new("default", "fresh")));

        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_filtered_events_never_reach_reconciler() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = Arc::new(ScriptedReconciler {
            filter: Some(EventFilter::create_only()),
            ..Default::default()
        });
        let (tx, handle) = start(&store, &reconciler, ControllerConfig::new("test"));

        let created = store.create(Widget::new("a", 1)).await.unwrap();
        wait_for(|| reconciler.calls() == 1).await;

        store.update(created.clone()).await.unwrap();
        store.delete(&created.key()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(reconciler.calls(), 1);
        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_retriable_error_is_retried_until_success() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = Arc::new(ScriptedReconciler::with_outcomes(vec![
            Err(ReconcileError::conflict("stale")),
            Err(ReconcileError::conflict("stale")),
        ]));
        let (tx, handle) = start(&store, &reconciler, ControllerConfig::new("test"));

        store.create(Widget::new("a", 1)).await.unwrap();
        wait_for(|| reconciler.calls() == 3).await;

        // Success ends the retry chain.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(reconciler.calls(), 3);

        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = Arc::new(ScriptedReconciler::with_outcomes(vec![Err(
            ReconcileError::permanent("unsupported"),
        )]));
        let (tx, handle) = start(&store, &reconciler, ControllerConfig::new("test"));

        store.create(Widget::new("a", 1)).await.unwrap();
        wait_for(|| reconciler.calls() == 1).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(reconciler.calls(), 1);
        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_max_retries_drops_key() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = Arc::new(ScriptedReconciler::with_outcomes(
            (0..10)
                .map(|_| Err(ReconcileError::conflict("stale")))
                .collect(),
        ));
        let config = ControllerConfig::new("test").with_max_retries(Some(2));
        let (tx, handle) = start(&store, &reconciler, config);

        store.create(Widget::new("a", 1)).await.unwrap();
        // One attempt plus two retries (100ms, 200ms backoff).
        wait_for(|| reconciler.calls() == 3).await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(reconciler.calls(), 3);
        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_requeue_action_runs_again() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = Arc::new(ScriptedReconciler::with_outcomes(vec![Ok(
            Action::Requeue(Duration::from_millis(20)),
        )]));
        let (tx, handle) = start(&store, &reconciler, ControllerConfig::new("test"));

        store.create(Widget::new("a", 1)).await.unwrap();
        wait_for(|| reconciler.calls() == 2).await;

        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_single_reconcile_in_flight_per_key() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = Arc::new(ScriptedReconciler {
            delay: Duration::from_millis(30),
            ..Default::default()
        });
        let config = ControllerConfig::new("test").with_max_concurrent_reconciles(4);
        let (tx, handle) = start(&store, &reconciler, config);

        let mut widget = store.create(Widget::new("a", 1)).await.unwrap();
        for size in 2..10 {
            widget.size = size;
            widget = store.update(widget).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        wait_for(|| reconciler.calls() >= 2).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(reconciler.max_active.load(Ordering::SeqCst), 1);
        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_distinct_keys_run_in_parallel() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = Arc::new(ScriptedReconciler {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let config = ControllerConfig::new("test").with_max_concurrent_reconciles(4);
        let (tx, handle) = start(&store, &reconciler, config);

        for name in ["a", "b", "c"] {
            store.create(Widget::new(name, 1)).await.unwrap();
        }
        wait_for(|| reconciler.calls() == 3).await;

        assert!(reconciler.max_active.load(Ordering::SeqCst) > 1);
        stop(tx, handle).await;
    }

    /// Hands out an already-ended stream on the first watch.
    struct EndingSource {
        store: Arc<InMemoryStore<Widget>>,
        watches: AtomicUsize,
    }

    #[async_trait]
    impl ObjectReader<Widget> for EndingSource {
        async fn get(&self, key: &ObjectKey) -> Result<Option<Widget>, StoreError> {
            self.store.get(key).await
        }

        async fn list(&self) -> Result<Vec<Widget>, StoreError> {
            self.store.list().await
        }

        async fn watch(&self) -> Result<BoxStream<'static, WatchEvent<Widget>>, StoreError> {
            if self.watches.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(futures::stream::empty().boxed());
            }
            self.store.watch().await
        }
    }

    #[tokio::test]
    async fn test_ended_watch_is_reopened() {
        let store = Arc::new(InMemoryStore::new());
        store.create(Widget::new("existing", 1)).await.unwrap();
        let source = Arc::new(EndingSource {
            store: Arc::clone(&store),
            watches: AtomicUsize::new(0),
        });

        let reconciler = Arc::new(ScriptedReconciler::default());
        let controller = Controller::with_arc_reconciler(
            source.clone() as Arc<dyn ObjectReader<Widget>>,
            Arc::clone(&reconciler),
            ControllerConfig::new("test"),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { controller.run(rx).await });

        wait_for(|| reconciler.calls() == 1).await;
        store.create(Widget::new("fresh", 1)).await.unwrap();
        wait_for(|| reconciler.calls() == 2).await;

        assert_eq!(source.watches.load(Ordering::SeqCst), 2);
        let seen = reconciler.seen.lock().unwrap().clone();
        assert!(seen.contains(&ObjectKey::new("default", "existing")));
        assert!(seen.contains(&ObjectKey::new("default", "fresh")));

        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_every_object_reconciled_when_watch_lags() {
        let store = Arc::new(InMemoryStore::with_watch_capacity(4));
        let reconciler = Arc::new(ScriptedReconciler::default());
        let config = ControllerConfig::new("test").with_max_concurrent_reconciles(2);
        let (tx, handle) = start(&store, &reconciler, config);

        for i in 0..50 {
            store.create(Widget::new(&format!("w{i}"), i)).await.unwrap();
        }

        let distinct = || {
            reconciler
                .seen
                .lock()
                .unwrap()
                .iter()
                .collect::<std::collections::BTreeSet<_>>()
                .len()
        };
        wait_for(|| distinct() == 50).await;

        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_reconcile() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = Arc::new(ScriptedReconciler {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let (tx, handle) = start(&store, &reconciler, ControllerConfig::new("test"));

        store.create(Widget::new("a", 1)).await.unwrap();
        wait_for(|| reconciler.active.load(Ordering::SeqCst) == 1).await;

        stop(tx, handle).await;
        assert_eq!(reconciler.calls(), 1);
    }
}
