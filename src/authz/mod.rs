pub mod evaluator;
pub mod hierarchy;

use thiserror::Error;

pub use evaluator::{AuthorizationConfig, AuthorizationEvaluator};
pub use hierarchy::{Role, RoleEdge, RoleHierarchy};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("Invalid role hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}
