use appdsn_models::TenantRecord;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::MySqlPool;

use crate::config::StoreConfig;
use crate::error::{RegistryError, Result};

/// Source of truth for tenant records.
///
/// The registry only ever reads through this seam, which keeps it testable
/// without a live database.
#[async_trait]
pub trait RecordSource: Send + Sync + 'static {
    /// Fetch the current record for one tenant; `NotFound` when the app key
    /// has no row.
    async fn fetch(&self, app_key: &str) -> Result<TenantRecord>;

    /// Fetch every tenant row, for eager bootstrap.
    async fn fetch_all(&self) -> Result<Vec<TenantRecord>>;
}

const SELECT_COLUMNS: &str = "app_id, app_key, dsn, dsn_slave, mongo_dsn, app_secret";

/// `RecordSource` backed by the central `app_dsns` table.
#[derive(Clone)]
pub struct TenantRecordStore {
    pool: MySqlPool,
}

impl TenantRecordStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let options: MySqlConnectOptions = config
            .url
            .parse()
            .map_err(|e| RegistryError::Config(format!("invalid registry store URL: {}", e)))?;

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordSource for TenantRecordStore {
    async fn fetch(&self, app_key: &str) -> Result<TenantRecord> {
        sqlx::query_as::<_, TenantRecord>(&format!(
            "SELECT {} FROM app_dsns WHERE app_key = ?",
            SELECT_COLUMNS
        ))
        .bind(app_key)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RegistryError::not_found(app_key))
    }

    async fn fetch_all(&self) -> Result<Vec<TenantRecord>> {
        Ok(
            sqlx::query_as::<_, TenantRecord>(&format!(
                "SELECT {} FROM app_dsns",
                SELECT_COLUMNS
            ))
            .fetch_all(&self.pool)
            .await?,
        )
    }
}
