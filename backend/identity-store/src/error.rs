use thiserror::Error;

pub type Result<T> = std::result::Result<T, IdentityError>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Credential blocked")]
    Blocked,

    #[error("User inactive")]
    Inactive,

    #[error("{0} expired")]
    Expired(&'static str),

    #[error("Credential mismatch")]
    Mismatch,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Operation deadline elapsed")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IdentityError {
    /// Worth retrying: the backend or the deadline failed, not the request
    pub fn is_transient(&self) -> bool {
        match self {
            IdentityError::Timeout => true,
            IdentityError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// The request was understood and refused; retrying it will not help
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            IdentityError::Blocked
                | IdentityError::Inactive
                | IdentityError::Expired(_)
                | IdentityError::Mismatch
                | IdentityError::Unsupported(_)
                | IdentityError::Conflict(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, IdentityError::NotFound(_))
    }
}

impl From<crypto_core::CryptoError> for IdentityError {
    fn from(err: crypto_core::CryptoError) -> Self {
        match err {
            crypto_core::CryptoError::UnsupportedAlgorithm(alg) => {
                IdentityError::Unsupported(format!("algorithm {}", alg))
            }
            other => IdentityError::Internal(other.to_string()),
        }
    }
}

/// Turn a unique-constraint violation into `Conflict`, pass anything else through
pub(crate) fn map_unique_violation(err: sqlx::Error, what: &str) -> IdentityError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            IdentityError::Conflict(format!(
                "{} already exists ({})",
                what,
                db_err.constraint().unwrap_or("unique")
            ))
        }
        _ => IdentityError::Database(err),
    }
}
