use sqlx::FromRow;

/// Opaque tenant identity. Every cache in the registry is keyed by it.
pub type AppKey = String;

/// One row of the central tenant registry (`app_dsns`).
///
/// Immutable once read; a refresh replaces the whole record rather than
/// mutating it in place.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TenantRecord {
    pub app_id: i32,
    pub app_key: String,
    #[sqlx(rename = "dsn")]
    pub primary_dsn: String,
    /// Empty when the tenant has no read replica.
    #[sqlx(rename = "dsn_slave")]
    pub replica_dsn: String,
    /// Empty when the tenant has no document store.
    #[sqlx(rename = "mongo_dsn")]
    pub doc_store_dsn: String,
    #[sqlx(rename = "app_secret")]
    pub secret: String,
}

impl TenantRecord {
    /// Document-store database name, derived from the tenant's numeric id.
    pub fn doc_store_db_name(&self) -> String {
        format!("GP_{}", self.app_id)
    }

    pub fn has_replica(&self) -> bool {
        !self.replica_dsn.is_empty()
    }

    pub fn has_doc_store(&self) -> bool {
        !self.doc_store_dsn.is_empty()
    }
}

/// Which endpoint of a tenant a caller wants.
///
/// `All` is a compound request: it expands to `Primary` then `Replica`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionCategory {
    Primary,
    Replica,
    All,
}

impl ConnectionCategory {
    /// The concrete cache slots this category touches, in connect order.
    pub fn expand(self) -> &'static [ConnectionCategory] {
        match self {
            ConnectionCategory::Primary => &[ConnectionCategory::Primary],
            ConnectionCategory::Replica => &[ConnectionCategory::Replica],
            ConnectionCategory::All => {
                &[ConnectionCategory::Primary, ConnectionCategory::Replica]
            }
        }
    }
}
