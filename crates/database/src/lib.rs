pub mod bootstrap;
pub mod config;
pub mod dialer;
pub mod error;
pub mod registry;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use bootstrap::{BootstrapReport, Bootstrapper};
pub use config::{PoolSettings, RegistryConfig, StoreConfig};
pub use dialer::{Dialer, DocDialer, SqlDialer};
pub use error::{RegistryError, Result};
pub use registry::{ConnectionRegistry, RegistryStats};
pub use store::{RecordSource, TenantRecordStore};

/// Registry over the relational (MySQL) side of every tenant.
pub type SqlRegistry = ConnectionRegistry<TenantRecordStore, SqlDialer>;

/// Registry over the document-store (MongoDB) side of every tenant.
pub type DocRegistry = ConnectionRegistry<TenantRecordStore, DocDialer>;
