// Invalidation bus: propagates tenant registry changes across processes and
// reconciles per-process connection caches against the source of truth.

pub mod error;
pub mod hooks;
pub mod pubsub;
pub mod reconcile;

pub use error::{BusError, Result};
pub use hooks::{LifecycleHook, LifecycleHookRegistry};
pub use pubsub::{BusConfig, Publisher, Subscriber};
pub use reconcile::Reconciler;
