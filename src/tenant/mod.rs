pub mod context;

pub use context::{ContextError, ContextScope, TenantContext};
