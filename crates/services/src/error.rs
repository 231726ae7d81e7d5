//! Service outcome taxonomy.

use thiserror::Error;

use aeternum_core::DomainError;
use aeternum_infra::{AuditError, IdentityFailure, StoreError};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Typed failure returned by every service operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Collaborator or backend failure; messages are kept in order.
    #[error("{}", .0.join(", "))]
    Failure(Vec<String>),
}

impl ServiceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Engine failures while creating an identity are the caller's fault.
    pub fn rejected(failure: IdentityFailure) -> Self {
        Self::Validation(failure.messages.join(", "))
    }

    pub fn failed(failure: IdentityFailure) -> Self {
        Self::Failure(failure.messages)
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::NotFound(what) => Self::NotFound(what),
            DomainError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Backend(msg) => Self::Failure(vec![msg]),
        }
    }
}

impl From<AuditError> for ServiceError {
    fn from(err: AuditError) -> Self {
        Self::Failure(vec![err.to_string()])
    }
}
