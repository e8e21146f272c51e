use service_core::error::AppError;
use thiserror::Error;

use super::store::{StoreError, INVITATIONS_PENDING_EMAIL_KEY, USERS_EMAIL_KEY};

/// Externally visible error kinds. Several rejection paths deliberately share
/// a kind (`NotFound`, `InvalidOrExpired`) so callers cannot probe scope
/// boundaries or token state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationFailed,
    Unauthorized,
    OutOfScope,
    CannotModifySelf,
    CannotRemoveSiteAccess,
    CannotDemoteSiteAdmin,
    NotFound,
    Conflict,
    InvalidOrExpired,
    InvalidCredentials,
    Storage,
    Internal,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Insufficient privileges")]
    Unauthorized,

    #[error("Site is outside your administered sites")]
    OutOfScope,

    #[error("Cannot modify own site access")]
    CannotModifySelf,

    #[error("Cannot remove site access granted within your sites")]
    CannotRemoveSiteAccess,

    #[error("Cannot demote a site admin")]
    CannotDemoteSiteAdmin,

    #[error("Not found")]
    NotFound,

    #[error("User with this email already exists")]
    UserAlreadyExists,

    #[error("Invitation already sent to this email")]
    InvitationAlreadyPending,

    #[error("Invalid or expired token")]
    InvalidOrExpired,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            ServiceError::Unauthorized => ErrorKind::Unauthorized,
            ServiceError::OutOfScope => ErrorKind::OutOfScope,
            ServiceError::CannotModifySelf => ErrorKind::CannotModifySelf,
            ServiceError::CannotRemoveSiteAccess => ErrorKind::CannotRemoveSiteAccess,
            ServiceError::CannotDemoteSiteAdmin => ErrorKind::CannotDemoteSiteAdmin,
            ServiceError::NotFound => ErrorKind::NotFound,
            ServiceError::UserAlreadyExists | ServiceError::InvitationAlreadyPending => {
                ErrorKind::Conflict
            }
            ServiceError::InvalidOrExpired => ErrorKind::InvalidOrExpired,
            ServiceError::InvalidCredentials => ErrorKind::InvalidCredentials,
            ServiceError::Storage(_) => ErrorKind::Storage,
            ServiceError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ServiceError::ValidationFailed(msg.into())
    }
}

/// Unique-constraint violations that have a domain meaning become conflicts;
/// everything else stays an opaque storage failure.
impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::Duplicate(constraint) if constraint == USERS_EMAIL_KEY => {
                ServiceError::UserAlreadyExists
            }
            StoreError::Duplicate(constraint) if constraint == INVITATIONS_PENDING_EMAIL_KEY => {
                ServiceError::InvitationAlreadyPending
            }
            _ => ServiceError::Storage(err),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::ValidationFailed(msg) => AppError::UnprocessableEntity(msg),
            ServiceError::Unauthorized
            | ServiceError::OutOfScope
            | ServiceError::CannotModifySelf
            | ServiceError::CannotRemoveSiteAccess
            | ServiceError::CannotDemoteSiteAdmin => AppError::Forbidden(anyhow::anyhow!(message)),
            ServiceError::NotFound => AppError::NotFound(anyhow::anyhow!(message)),
            ServiceError::UserAlreadyExists | ServiceError::InvitationAlreadyPending => {
                AppError::Conflict(anyhow::anyhow!(message))
            }
            ServiceError::InvalidOrExpired => AppError::BadRequest(anyhow::anyhow!(message)),
            ServiceError::InvalidCredentials => AppError::AuthError(anyhow::anyhow!(message)),
            ServiceError::Storage(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
