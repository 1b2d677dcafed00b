use appdsn_models::{ConnectionCategory, TenantRecord};
use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::Client;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::MySqlPool;

use crate::config::PoolSettings;
use crate::error::{RegistryError, Result};

/// Opens, probes, and closes tenant connections. Stateless per call; the
/// registry owns the resulting handles.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    async fn open(
        &self,
        record: &TenantRecord,
        category: ConnectionCategory,
        pool: &PoolSettings,
    ) -> Result<Self::Handle>;

    async fn ping(&self, handle: &Self::Handle) -> Result<()>;

    /// Whether callers currently hold live connections out of this handle.
    /// Drives the conditional part of eviction.
    fn in_use(&self, handle: &Self::Handle) -> bool;

    /// Graceful close: new acquires stop, outstanding connections drain.
    async fn close(&self, handle: &Self::Handle);
}

/// Dialer for the relational (MySQL) side of a tenant.
#[derive(Debug, Clone, Default)]
pub struct SqlDialer;

impl SqlDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for SqlDialer {
    type Handle = MySqlPool;

    async fn open(
        &self,
        record: &TenantRecord,
        category: ConnectionCategory,
        pool: &PoolSettings,
    ) -> Result<MySqlPool> {
        // A tenant without a replica serves replica reads from the primary.
        let dsn = match category {
            ConnectionCategory::Replica if record.has_replica() => &record.replica_dsn,
            _ => &record.primary_dsn,
        };

        let options: MySqlConnectOptions = dsn.parse().map_err(|e| {
            RegistryError::Config(format!(
                "invalid {:?} DSN for tenant {}: {}",
                category, record.app_key, e
            ))
        })?;

        MySqlPoolOptions::new()
            .max_connections(pool.max_open)
            .idle_timeout(pool.idle_timeout)
            .max_lifetime(pool.max_lifetime)
            .acquire_timeout(pool.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| {
                RegistryError::ConnectionFailed(format!(
                    "failed to open {:?} connection for tenant {}: {}",
                    category, record.app_key, e
                ))
            })
    }

    async fn ping(&self, handle: &MySqlPool) -> Result<()> {
        sqlx::query("SELECT 1").execute(handle).await?;
        Ok(())
    }

    fn in_use(&self, handle: &MySqlPool) -> bool {
        handle.size() as usize > handle.num_idle()
    }

    async fn close(&self, handle: &MySqlPool) {
        handle.close().await;
    }
}

/// Dialer for the document-store (MongoDB) side of a tenant.
///
/// The driver exposes no pool statistics, so `in_use` always reports false
/// and eviction of document-store handles is unconditional.
#[derive(Debug, Clone, Default)]
pub struct DocDialer;

impl DocDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for DocDialer {
    type Handle = Client;

    async fn open(
        &self,
        record: &TenantRecord,
        _category: ConnectionCategory,
        _pool: &PoolSettings,
    ) -> Result<Client> {
        if !record.has_doc_store() {
            return Err(RegistryError::Config(format!(
                "tenant {} has no document-store DSN",
                record.app_key
            )));
        }

        let client = Client::with_uri_str(&record.doc_store_dsn).await?;
        client
            .database(&record.doc_store_db_name())
            .run_command(doc! { "ping": 1 })
            .await?;

        Ok(client)
    }

    async fn ping(&self, handle: &Client) -> Result<()> {
        handle
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    fn in_use(&self, _handle: &Client) -> bool {
        false
    }

    async fn close(&self, handle: &Client) {
        handle.clone().shutdown().await;
    }
}
