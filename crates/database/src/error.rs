use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Tenant not found: {0}")]
    NotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Document store error: {0}")]
    DocStore(#[from] mongodb::error::Error),

    #[error("Timed out waiting for connection: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RegistryError {
    pub fn not_found(app_key: &str) -> Self {
        Self::NotFound(format!("tenant with app key {} not found", app_key))
    }
}
