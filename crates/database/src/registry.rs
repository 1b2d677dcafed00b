use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use appdsn_models::{AppKey, ConnectionCategory, TenantRecord};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::config::RegistryConfig;
use crate::dialer::Dialer;
use crate::error::{RegistryError, Result};
use crate::store::RecordSource;

type FlightKey = (ConnectionCategory, AppKey);

/// Multi-tenant connection registry.
///
/// Owns three concurrent maps (tenant records, primary handles, replica
/// handles) plus an in-flight map that single-flights establishment: exactly
/// one task opens a given (category, tenant) connection while concurrent
/// callers wait on its completion signal, bounded by `connect_deadline`.
///
/// Handles are shared-ownership clones; replacing a cache entry never
/// invalidates clones other tasks still hold.
pub struct ConnectionRegistry<S, D: Dialer> {
    source: S,
    dialer: D,
    config: RegistryConfig,
    records: DashMap<AppKey, TenantRecord>,
    primaries: DashMap<AppKey, D::Handle>,
    replicas: DashMap<AppKey, D::Handle>,
    inflight: DashMap<FlightKey, Arc<Notify>>,
}

/// Snapshot of cache occupancy, for health endpoints and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub records: usize,
    pub primaries: usize,
    pub replicas: usize,
    pub inflight: usize,
}

/// Releases in-flight markers on every exit path, including panics, and
/// wakes all waiters.
struct FlightGuard<'a, S, D: Dialer> {
    registry: &'a ConnectionRegistry<S, D>,
    keys: Vec<FlightKey>,
}

impl<S, D: Dialer> Drop for FlightGuard<'_, S, D> {
    fn drop(&mut self) {
        for key in self.keys.drain(..) {
            if let Some((_, notify)) = self.registry.inflight.remove(&key) {
                notify.notify_waiters();
            }
        }
    }
}

impl<S: RecordSource, D: Dialer> ConnectionRegistry<S, D> {
    pub fn new(source: S, dialer: D, config: RegistryConfig) -> Self {
        Self {
            source,
            dialer,
            config,
            records: DashMap::new(),
            primaries: DashMap::new(),
            replicas: DashMap::new(),
            inflight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    /// True iff the tenant record is cached. Says nothing about whether a
    /// live connection exists yet.
    pub fn check_loaded(&self, app_key: &str) -> bool {
        self.records.contains_key(app_key)
    }

    /// Cached copy of the tenant record, if loaded.
    pub fn record(&self, app_key: &str) -> Option<TenantRecord> {
        self.records.get(app_key).map(|r| r.value().clone())
    }

    /// Returns the cached handle for `(app_key, category)`, establishing it
    /// lazily on first use.
    ///
    /// When another task is already establishing the same connection, this
    /// waits on its completion signal and re-checks the cache, giving up at
    /// `connect_deadline`. Establishment failures evict any partial state for
    /// the tenant and are never cached, so the next call retries from
    /// scratch.
    pub async fn get(&self, app_key: &str, category: ConnectionCategory) -> Result<D::Handle> {
        let deadline = Instant::now() + self.config.connect_deadline;
        loop {
            if let Some(handle) = self.cached(app_key, category) {
                return Ok(handle);
            }

            if let Some(notify) = self.current_flight(app_key, category) {
                if Instant::now() >= deadline {
                    return Err(RegistryError::Timeout(format!(
                        "gave up waiting for in-flight {:?} connection for tenant {}",
                        category, app_key
                    )));
                }
                let _ = tokio::time::timeout(self.config.inflight_wait, notify.notified()).await;
                continue;
            }

            let Some(_guard) = self.claim_flight(app_key, category) else {
                // lost the leadership race; go back to waiting
                continue;
            };

            self.connect(app_key, category, false).await?;
            return self.cached(app_key, category).ok_or_else(|| {
                RegistryError::ConnectionFailed(format!(
                    "connection for tenant {} vanished during establishment",
                    app_key
                ))
            });
        }
    }

    pub async fn get_primary(&self, app_key: &str) -> Result<D::Handle> {
        self.get(app_key, ConnectionCategory::Primary).await
    }

    pub async fn get_replica(&self, app_key: &str) -> Result<D::Handle> {
        self.get(app_key, ConnectionCategory::Replica).await
    }

    /// Snapshot of every cached primary handle.
    pub fn get_all(&self) -> HashMap<AppKey, D::Handle> {
        self.primaries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Re-fetches the tenant record and re-establishes primary and replica
    /// connections, replacing cache entries unconditionally. Superseded
    /// handles are closed gracefully after the swap, so callers still holding
    /// them drain instead of erroring.
    pub async fn refresh(&self, app_key: &str) -> Result<()> {
        let _guard = self.claim_flight(app_key, ConnectionCategory::All);
        self.connect(app_key, ConnectionCategory::All, true).await
    }

    /// Evicts the tenant record and any cached handle whose underlying
    /// connection is not currently in use (the document-store dialer cannot
    /// observe usage, so its handles are always evicted). Returns whether
    /// anything was actually deleted; a second call on the same tenant
    /// returns false.
    pub async fn remove(&self, app_key: &str) -> bool {
        let mut removed = self.records.remove(app_key).is_some();

        for cat in [ConnectionCategory::Primary, ConnectionCategory::Replica] {
            let evicted = self
                .map_for(cat)
                .remove_if(app_key, |_, handle| !self.dialer.in_use(handle));
            if let Some((_, handle)) = evicted {
                self.dialer.close(&handle).await;
                removed = true;
            }
        }

        if removed {
            tracing::info!("tenant {}: evicted from registry", app_key);
        }
        removed
    }

    /// Shared open logic behind first connect, refresh, and reconciliation.
    ///
    /// Fetches the record fresh from the source of truth (any cached copy is
    /// ignored and overwritten), then opens connections in category order,
    /// failing fast: when `All` is requested and the primary open fails, the
    /// replica is never attempted.
    ///
    /// `overwrite` controls the cache-store step: when set, existing entries
    /// are replaced and the superseded handle is closed after the swap; when
    /// clear, a concurrently stored handle wins and the freshly opened one is
    /// closed instead.
    pub async fn connect(
        &self,
        app_key: &str,
        category: ConnectionCategory,
        overwrite: bool,
    ) -> Result<()> {
        let record = self.source.fetch(app_key).await?;
        self.records.insert(record.app_key.clone(), record.clone());

        let mut stored: Vec<ConnectionCategory> = Vec::new();
        for cat in category.expand() {
            let handle = match self.dialer.open(&record, *cat, &self.config.pool).await {
                Ok(handle) => handle,
                Err(err) => {
                    tracing::warn!(
                        "tenant {}: {:?} connect failed, evicting partial state: {}",
                        app_key,
                        cat,
                        err
                    );
                    self.rollback(app_key, &stored).await;
                    return Err(err);
                }
            };
            if let Some(close_me) = self.store_handle(app_key, *cat, handle, overwrite) {
                self.dialer.close(&close_me).await;
            }
            stored.push(*cat);
        }

        tracing::info!(
            "tenant {}: {:?} connection(s) ready (stage: {})",
            app_key,
            category,
            self.config.stage
        );
        Ok(())
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            records: self.records.len(),
            primaries: self.primaries.len(),
            replicas: self.replicas.len(),
            inflight: self.inflight.len(),
        }
    }

    fn cached(&self, app_key: &str, category: ConnectionCategory) -> Option<D::Handle> {
        match category {
            ConnectionCategory::Primary => self.primaries.get(app_key).map(|h| h.value().clone()),
            ConnectionCategory::Replica => self.replicas.get(app_key).map(|h| h.value().clone()),
            ConnectionCategory::All => {
                let primary = self.primaries.get(app_key).map(|h| h.value().clone())?;
                self.replicas.contains_key(app_key).then_some(primary)
            }
        }
    }

    fn current_flight(&self, app_key: &str, category: ConnectionCategory) -> Option<Arc<Notify>> {
        category.expand().iter().find_map(|cat| {
            self.inflight
                .get(&(*cat, app_key.to_string()))
                .map(|n| n.value().clone())
        })
    }

    /// Claims in-flight markers for every free slot the category expands to.
    /// Returns None when another task already holds all of them.
    fn claim_flight(
        &self,
        app_key: &str,
        category: ConnectionCategory,
    ) -> Option<FlightGuard<'_, S, D>> {
        let mut claimed = Vec::new();
        for cat in category.expand() {
            match self.inflight.entry((*cat, app_key.to_string())) {
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(Notify::new()));
                    claimed.push((*cat, app_key.to_string()));
                }
                Entry::Occupied(_) => {}
            }
        }
        if claimed.is_empty() {
            None
        } else {
            Some(FlightGuard {
                registry: self,
                keys: claimed,
            })
        }
    }

    /// Single-map-operation cache store. Returns the handle that must now be
    /// closed: the superseded entry when overwriting, or the freshly opened
    /// handle when another writer won the first-writer-wins race.
    fn store_handle(
        &self,
        app_key: &str,
        category: ConnectionCategory,
        handle: D::Handle,
        overwrite: bool,
    ) -> Option<D::Handle> {
        let map = self.map_for(category);
        if overwrite {
            map.insert(app_key.to_string(), handle)
        } else {
            match map.entry(app_key.to_string()) {
                Entry::Occupied(_) => Some(handle),
                Entry::Vacant(entry) => {
                    entry.insert(handle);
                    None
                }
            }
        }
    }

    async fn rollback(&self, app_key: &str, stored: &[ConnectionCategory]) {
        for cat in stored {
            if let Some((_, handle)) = self.map_for(*cat).remove(app_key) {
                self.dialer.close(&handle).await;
            }
        }
        // keep the record only while some handle still references the tenant
        if !self.primaries.contains_key(app_key) && !self.replicas.contains_key(app_key) {
            self.records.remove(app_key);
        }
    }

    fn map_for(&self, category: ConnectionCategory) -> &DashMap<AppKey, D::Handle> {
        match category {
            ConnectionCategory::Replica => &self.replicas,
            _ => &self.primaries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemDialer, MemSource};
    use std::time::Duration;

    fn quick_config() -> RegistryConfig {
        RegistryConfig::default()
            .with_inflight_wait(Duration::from_millis(10))
            .with_connect_deadline(Duration::from_secs(2))
    }

    fn registry_with(
        records: &[(&str, &str, &str)],
    ) -> Arc<ConnectionRegistry<MemSource, MemDialer>> {
        let source = MemSource::new();
        for (key, primary, replica) in records {
            source.insert(MemSource::record(key, primary, replica));
        }
        Arc::new(ConnectionRegistry::new(
            source,
            MemDialer::new(),
            quick_config(),
        ))
    }

    #[tokio::test]
    async fn test_lazy_first_get() {
        let registry = registry_with(&[("A1", "dsn1", "dsn1r")]);
        assert!(!registry.check_loaded("A1"));

        let handle = registry.get_primary("A1").await.unwrap();
        assert_eq!(handle.dsn, "dsn1");
        assert!(registry.check_loaded("A1"));
        assert_eq!(registry.stats().primaries, 1);
    }

    #[tokio::test]
    async fn test_unknown_tenant() {
        let registry = registry_with(&[]);
        let result = registry.get_primary("nope").await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
        assert!(!registry.check_loaded("nope"));
    }

    #[tokio::test]
    async fn test_get_all_category_caches_both() {
        let registry = registry_with(&[("A1", "dsn1", "dsn1r")]);
        let primary = registry.get("A1", ConnectionCategory::All).await.unwrap();
        assert_eq!(primary.dsn, "dsn1");

        let replica = registry.get_replica("A1").await.unwrap();
        assert_eq!(replica.dsn, "dsn1r");
        // both were opened by the single All connect
        assert_eq!(registry.source().fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_replica_dsn_falls_back_to_primary() {
        let registry = registry_with(&[("A2", "dsn2", "")]);
        let replica = registry.get_replica("A2").await.unwrap();
        assert_eq!(replica.dsn, "dsn2");
    }

    #[tokio::test]
    async fn test_single_flight_concurrent_gets() {
        let registry = registry_with(&[("A1", "dsn1", "")]);
        registry.dialer().set_open_delay(Duration::from_millis(50));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(
                async move { registry.get_primary("A1").await },
            ));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1, "all callers must share one handle");
        assert_eq!(registry.dialer().opens(), 1, "exactly one dial may happen");
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let registry = registry_with(&[("A1", "dsn1", "")]);
        registry.dialer().fail_tenant("A1");

        let result = registry.get_primary("A1").await;
        assert!(matches!(result, Err(RegistryError::ConnectionFailed(_))));
        assert!(!registry.check_loaded("A1"), "partial state must be evicted");
        assert_eq!(registry.stats().inflight, 0, "marker must be released");

        // next call retries from scratch and succeeds
        registry.dialer().heal_tenant("A1");
        assert!(registry.get_primary("A1").await.is_ok());
    }

    #[tokio::test]
    async fn test_replica_failure_rolls_back_this_attempt() {
        let registry = registry_with(&[("A1", "dsn1", "dsn1r")]);
        registry.dialer().fail_dsn("dsn1r");

        let result = registry.get("A1", ConnectionCategory::All).await;
        assert!(result.is_err());
        assert_eq!(registry.stats().primaries, 0);
        assert_eq!(registry.stats().replicas, 0);
    }

    #[tokio::test]
    async fn test_refresh_replaces_and_closes_superseded() {
        let registry = registry_with(&[("A1", "dsn1", "dsn1r")]);
        let old = registry.get("A1", ConnectionCategory::All).await.unwrap();

        // the source of truth changed its DSN
        registry
            .source()
            .insert(MemSource::record("A1", "dsn1-new", "dsn1r"));
        registry.refresh("A1").await.unwrap();

        let fresh = registry.get_primary("A1").await.unwrap();
        assert_eq!(fresh.dsn, "dsn1-new");
        assert_ne!(fresh.id, old.id);
        assert!(
            registry.dialer().closed_ids().contains(&old.id),
            "superseded handle must be closed after the swap"
        );
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = registry_with(&[("A1", "dsn1", "")]);
        registry.get_primary("A1").await.unwrap();

        assert!(registry.remove("A1").await);
        assert!(!registry.remove("A1").await);
        assert!(!registry.check_loaded("A1"));
    }

    #[tokio::test]
    async fn test_remove_skips_handles_in_use() {
        let registry = registry_with(&[("A1", "dsn1", "")]);
        registry.get_primary("A1").await.unwrap();
        registry.dialer().mark_in_use("dsn1");

        // record goes away, the busy handle stays
        assert!(registry.remove("A1").await);
        assert_eq!(registry.stats().primaries, 1);

        registry.dialer().release("dsn1");
        assert!(registry.remove("A1").await);
        assert_eq!(registry.stats().primaries, 0);
    }

    #[tokio::test]
    async fn test_waiter_times_out_on_stuck_flight() {
        let config = quick_config().with_connect_deadline(Duration::from_millis(50));
        let registry = ConnectionRegistry::new(MemSource::new(), MemDialer::new(), config);

        // simulate an establishment that never completes
        registry.inflight.insert(
            (ConnectionCategory::Primary, "A1".to_string()),
            Arc::new(Notify::new()),
        );

        let result = registry.get_primary("A1").await;
        assert!(matches!(result, Err(RegistryError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_last_write_wins_record() {
        let registry = registry_with(&[("A1", "dsn1", "")]);
        registry.get_primary("A1").await.unwrap();
        registry
            .source()
            .insert(MemSource::record("A1", "dsn-changed", ""));
        registry.refresh("A1").await.unwrap();

        let record = registry.record("A1").unwrap();
        assert_eq!(record.primary_dsn, "dsn-changed");
        assert_eq!(registry.stats().records, 1, "one record per tenant");
    }
}
