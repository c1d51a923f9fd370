//! Domain errors for the sightline perception system.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the sightline system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Invalid entity reference: {0}")]
    InvalidEntity(String),

    #[error("Visibility oracle unavailable")]
    VisibilityOracleUnavailable,

    #[error("Cover oracle unavailable")]
    CoverOracleUnavailable,

    #[error("Oracle call failed: {0}")]
    OracleFailed(String),

    #[error("Geometry query failed: {0}")]
    GeometryFailed(String),

    #[error("Flag store error: {0}")]
    FlagStoreError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Batch computation timed out after {0}ms")]
    BatchTimeout(u64),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::FlagStoreError(err.to_string())
    }
}
