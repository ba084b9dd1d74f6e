//! Error types for database operations

use classroom_core::jobs::{JobId, QueueError};
use classroom_core::StoreError;
use thiserror::Error;

/// Database error types
#[derive(Error, Debug)]
pub enum Error {
    /// SQLx database error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job not found
    #[error("Job {0} not found")]
    JobNotFound(i64),

    /// Write rejected by an invariant
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation not allowed in the record's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Stored value that cannot be mapped back to the domain
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    fn is_unique_violation(&self) -> bool {
        match self {
            Error::Sqlx(sqlx::Error::Database(e)) => e.is_unique_violation(),
            _ => false,
        }
    }
}

impl From<Error> for StoreError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(what) => StoreError::NotFound(what),
            Error::Conflict(what) => StoreError::Conflict(what),
            e if e.is_unique_violation() => StoreError::Conflict(e.to_string()),
            e => StoreError::Backend(e.to_string()),
        }
    }
}

impl From<Error> for QueueError {
    fn from(err: Error) -> Self {
        match err {
            Error::JobNotFound(id) => QueueError::NotFound(JobId(id)),
            Error::InvalidState(what) => QueueError::InvalidState(what),
            e => QueueError::Backend(e.to_string()),
        }
    }
}

/// Convert an unsigned remote id for storage
pub(crate) fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::InvalidData(format!("{} {} out of range", what, value)))
}

/// Convert a stored id back to its unsigned form
pub(crate) fn to_u64(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::InvalidData(format!("{} {} is negative", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            StoreError::from(Error::NotFound("binding 3".into())),
            StoreError::NotFound(what) if what == "binding 3"
        ));
        assert!(matches!(
            StoreError::from(Error::Conflict("remote id".into())),
            StoreError::Conflict(_)
        ));
        // anything the domain has no name for is a backend failure
        assert!(matches!(
            StoreError::from(Error::InvalidData("actor kind".into())),
            StoreError::Backend(_)
        ));
        assert!(matches!(
            StoreError::from(Error::Sqlx(sqlx::Error::RowNotFound)),
            StoreError::Backend(_)
        ));
    }

    #[test]
    fn test_queue_error_mapping() {
        assert!(matches!(
            QueueError::from(Error::JobNotFound(9)),
            QueueError::NotFound(JobId(9))
        ));
        assert!(matches!(
            QueueError::from(Error::InvalidState("job 9 is running".into())),
            QueueError::InvalidState(_)
        ));
        assert!(matches!(
            QueueError::from(Error::Io("disk full".into())),
            QueueError::Backend(_)
        ));
    }

    #[test]
    fn test_id_range_checks() {
        assert_eq!(to_i64(42, "repo id").unwrap(), 42);
        assert!(matches!(to_i64(u64::MAX, "repo id"), Err(Error::InvalidData(_))));
        assert!(matches!(to_u64(-1, "repo id"), Err(Error::InvalidData(_))));
    }
}
