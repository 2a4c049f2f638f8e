//! Domain error model.

use thiserror::Error;

use crate::validator::FieldErrors;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every layer (stores, lifecycle, HTTP adapter) funnels its failures into this
/// enum; the HTTP boundary is the only place that turns it into a response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// One or more fields failed validation (user-correctable).
    #[error("validation failed: {0:?}")]
    ValidationFailed(FieldErrors),

    /// The request envelope itself was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A lookup missed.
    ///
    /// Token lookups report wrong, expired and mis-scoped tokens through this
    /// same variant so callers cannot tell the cases apart.
    #[error("record not found")]
    RecordNotFound,

    /// The case-insensitive unique email constraint was violated.
    #[error("duplicate email")]
    DuplicateEmail,

    /// Optimistic concurrency miss; re-fetch and retry.
    #[error("edit conflict")]
    EditConflict,

    /// Authentication miss. Never says whether the email exists.
    #[error("invalid authentication credentials")]
    InvalidCredentials,

    /// Invariant violation or infrastructure failure; fatal to the request.
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

impl DomainError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unrecoverable(msg: impl Into<String>) -> Self {
        Self::Unrecoverable(msg.into())
    }

    /// Build a single-field validation failure.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.into(), message.into());
        Self::ValidationFailed(errors)
    }

    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable(_))
    }
}
