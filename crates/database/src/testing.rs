//! In-memory test doubles for the record source and dialer seams.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use appdsn_models::{ConnectionCategory, TenantRecord};
use async_trait::async_trait;

use crate::config::PoolSettings;
use crate::dialer::Dialer;
use crate::error::{RegistryError, Result};
use crate::store::RecordSource;

pub struct MemSource {
    records: Mutex<HashMap<String, TenantRecord>>,
    fail_all: AtomicBool,
    fetch_calls: AtomicUsize,
}

impl MemSource {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            fail_all: AtomicBool::new(false),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn record(app_key: &str, primary: &str, replica: &str) -> TenantRecord {
        TenantRecord {
            app_id: 1,
            app_key: app_key.to_string(),
            primary_dsn: primary.to_string(),
            replica_dsn: replica.to_string(),
            doc_store_dsn: String::new(),
            secret: String::new(),
        }
    }

    pub fn insert(&self, record: TenantRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.app_key.clone(), record);
    }

    pub fn fail_everything(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for MemSource {
    async fn fetch(&self, app_key: &str) -> Result<TenantRecord> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(RegistryError::Store(sqlx::Error::PoolClosed));
        }
        self.records
            .lock()
            .unwrap()
            .get(app_key)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(app_key))
    }

    async fn fetch_all(&self) -> Result<Vec<TenantRecord>> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(RegistryError::Store(sqlx::Error::PoolClosed));
        }
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemHandle {
    pub id: usize,
    pub dsn: String,
}

pub struct MemDialer {
    next_id: AtomicUsize,
    opens: AtomicUsize,
    closed: Mutex<Vec<usize>>,
    fail_tenants: Mutex<HashSet<String>>,
    fail_dsns: Mutex<HashSet<String>>,
    panic_tenants: Mutex<HashSet<String>>,
    in_use_dsns: Mutex<HashSet<String>>,
    open_delay: Mutex<Option<Duration>>,
}

impl MemDialer {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            closed: Mutex::new(Vec::new()),
            fail_tenants: Mutex::new(HashSet::new()),
            fail_dsns: Mutex::new(HashSet::new()),
            panic_tenants: Mutex::new(HashSet::new()),
            in_use_dsns: Mutex::new(HashSet::new()),
            open_delay: Mutex::new(None),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closed_ids(&self) -> Vec<usize> {
        self.closed.lock().unwrap().clone()
    }

    pub fn fail_tenant(&self, app_key: &str) {
        self.fail_tenants.lock().unwrap().insert(app_key.to_string());
    }

    pub fn heal_tenant(&self, app_key: &str) {
        self.fail_tenants.lock().unwrap().remove(app_key);
    }

    pub fn fail_dsn(&self, dsn: &str) {
        self.fail_dsns.lock().unwrap().insert(dsn.to_string());
    }

    pub fn panic_tenant(&self, app_key: &str) {
        self.panic_tenants.lock().unwrap().insert(app_key.to_string());
    }

    pub fn mark_in_use(&self, dsn: &str) {
        self.in_use_dsns.lock().unwrap().insert(dsn.to_string());
    }

    pub fn release(&self, dsn: &str) {
        self.in_use_dsns.lock().unwrap().remove(dsn);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl Dialer for MemDialer {
    type Handle = MemHandle;

    async fn open(
        &self,
        record: &TenantRecord,
        category: ConnectionCategory,
        _pool: &PoolSettings,
    ) -> Result<MemHandle> {
        let delay = *self.open_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.panic_tenants.lock().unwrap().contains(&record.app_key) {
            panic!("injected panic while dialing {}", record.app_key);
        }

        let dsn = match category {
            ConnectionCategory::Replica if record.has_replica() => record.replica_dsn.clone(),
            _ => record.primary_dsn.clone(),
        };

        if self.fail_tenants.lock().unwrap().contains(&record.app_key)
            || self.fail_dsns.lock().unwrap().contains(&dsn)
        {
            return Err(RegistryError::ConnectionFailed(format!(
                "injected failure for tenant {}",
                record.app_key
            )));
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MemHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            dsn,
        })
    }

    async fn ping(&self, _handle: &MemHandle) -> Result<()> {
        Ok(())
    }

    fn in_use(&self, handle: &MemHandle) -> bool {
        self.in_use_dsns.lock().unwrap().contains(&handle.dsn)
    }

    async fn close(&self, handle: &MemHandle) {
        self.closed.lock().unwrap().push(handle.id);
    }
}
