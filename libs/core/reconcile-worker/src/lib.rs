//! Reconcile Worker Framework
//!
//! A generic level-triggered controller runtime for declarative objects.
//!
//! ## Features
//!
//! - **Generic controller**: `Controller<K, R>` drives any `Resource` kind
//! - **Work queue**: deduplicated keys, one reconcile in flight per object
//! - **Event filters**: drop create/update/delete events before they queue
//! - **Backoff**: requeue delays derived from the error category
//! - **Object store traits**: read-only `ObjectReader`, CAS `StatusWriter`
//! - **Prometheus metrics** and K8s-style health endpoints
//!
//! ## Example
//!
//! ```ignore
//! use reconcile_worker::{Controller, ControllerConfig, InMemoryStore, ObjectReader};
//!
//! let store = Arc::new(InMemoryStore::<Email>::new());
//! let source: Arc<dyn ObjectReader<Email>> = store.clone();
//!
//! let config = ControllerConfig::new("email").with_max_concurrent_reconciles(4);
//! let controller = Controller::new(source, EmailReconciler::new(/* ... */), config);
//! controller.run(shutdown_rx).await?;
//! ```

mod config;
mod controller;
mod error;
mod event;
mod health;
pub mod metrics;
mod queue;
mod resource;
mod store;

#[cfg(test)]
mod testing;

pub use config::ControllerConfig;
pub use controller::{Action, Controller, Reconciler};
pub use error::{ErrorCategory, ReconcileError, StoreError};
pub use event::{EventFilter, EventKind, WatchEvent};
pub use health::{HealthState, health_router};
pub use metrics::{ControllerMetrics, init_metrics};
pub use queue::WorkQueue;
pub use resource::{ObjectKey, ObjectMeta, Resource};
pub use store::{InMemoryStore, ObjectReader, StatusWriter};
