// Domain errors returned by the data-access layer

use crate::status::PropertyStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: PropertyStatus,
        to: PropertyStatus,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        DomainError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
