pub mod binder;
pub mod manager;
pub mod memory;
pub mod store;

pub use binder::{BindError, BoundConnection, PgSessionPool, SessionPool, TenantBinder};
pub use manager::{DatabaseError, DatabaseManager};
pub use memory::{MemoryApprovalStore, MemoryPool};
pub use store::{ApprovalStore, PgApprovalStore, StoreError};
