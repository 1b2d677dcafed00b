// Shared domain types for the tenant connection registry

pub mod event;
pub mod tenant;

pub use event::{ChangeEvent, ChangeKind};
pub use tenant::{AppKey, ConnectionCategory, TenantRecord};
