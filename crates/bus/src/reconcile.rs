use std::sync::Arc;

use appdsn_database::dialer::Dialer;
use appdsn_database::registry::ConnectionRegistry;
use appdsn_database::store::RecordSource;
use appdsn_models::{ChangeEvent, ChangeKind, ConnectionCategory};

use crate::hooks::LifecycleHookRegistry;

/// Applies tenant change events to a registry and fires lifecycle hooks.
///
/// Every handler re-fetches the authoritative record instead of trusting the
/// event payload, so concurrently published events for the same tenant
/// converge on the source of truth regardless of arrival order.
pub struct Reconciler<S: RecordSource, D: Dialer> {
    registry: Arc<ConnectionRegistry<S, D>>,
    hooks: LifecycleHookRegistry,
}

impl<S: RecordSource, D: Dialer> Reconciler<S, D> {
    pub fn new(registry: Arc<ConnectionRegistry<S, D>>, hooks: LifecycleHookRegistry) -> Self {
        Self { registry, hooks }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<S, D>> {
        &self.registry
    }

    pub async fn apply(&self, event: &ChangeEvent) {
        match event.kind {
            ChangeKind::Added => {
                // non-forced: if a lazy caller raced ahead and already cached
                // a handle, the first writer wins and ours is discarded
                if let Err(err) = self
                    .registry
                    .connect(&event.app_key, ConnectionCategory::All, false)
                    .await
                {
                    tracing::warn!(
                        "reconcile: add of tenant {} failed: {}",
                        event.app_key,
                        err
                    );
                }
                self.hooks.run_add(&event.app_key);
            }
            ChangeKind::Updated => {
                // updates to tenants nobody loaded are wasted work; skip them
                if !self.registry.check_loaded(&event.app_key) {
                    tracing::debug!(
                        "reconcile: tenant {} not loaded, ignoring update",
                        event.app_key
                    );
                    return;
                }
                if let Err(err) = self.registry.refresh(&event.app_key).await {
                    tracing::warn!(
                        "reconcile: update of tenant {} failed: {}",
                        event.app_key,
                        err
                    );
                }
                self.hooks.run_update(&event.app_key);
            }
            ChangeKind::Removed => {
                let removed = self.registry.remove(&event.app_key).await;
                tracing::debug!(
                    "reconcile: tenant {} removed, deleted={}",
                    event.app_key,
                    removed
                );
                self.hooks.run_delete(&event.app_key);
            }
        }
    }
}
