//! Contract with the external version-control host

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Organization, Permission, RemoteRepository, Visibility};

/// Result type for remote calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Failure of a single remote call, already classified
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// A repository with the requested name already exists
    #[error("Repository already exists: {0}")]
    AlreadyExists(String),

    /// The addressed resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The shared rate-limit budget is exhausted
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The request exceeded its timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Any other non-success status
    #[error("Remote returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether the same call is expected to succeed on retry
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::RateLimited { .. } | RemoteError::Timeout(_) | RemoteError::Network(_) => {
                true
            }
            RemoteError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Minimum delay hinted by the remote host, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Typed facade over the remote host's repository, team and membership operations
///
/// Implementations issue each operation at most once; retrying is left to the
/// provisioning job so that failure accounting stays in one place.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Create a repository owned by `org`
    async fn create_org_repo(
        &self,
        org: &Organization,
        name: &str,
        visibility: Visibility,
    ) -> RemoteResult<RemoteRepository>;

    /// Look up an existing repository of `org` by name
    async fn find_org_repo(&self, org: &Organization, name: &str) -> RemoteResult<RemoteRepository>;

    /// Grant a team access to a repository
    async fn add_team_to_repo(
        &self,
        team_id: u64,
        repo_full_name: &str,
        permission: Permission,
    ) -> RemoteResult<()>;

    /// Invite a single account as collaborator
    async fn add_collaborator(
        &self,
        repo_full_name: &str,
        login: &str,
        permission: Permission,
    ) -> RemoteResult<()>;

    /// Import the contents of `source_repo_id` into the repository
    async fn push_starter_code(&self, repo_full_name: &str, source_repo_id: u64)
        -> RemoteResult<()>;

    /// Delete a repository by id
    async fn delete_repo(&self, repo_id: u64) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Timeout("create".into()).is_transient());
        assert!(RemoteError::Network("reset".into()).is_transient());
        assert!(RemoteError::RateLimited { retry_after: None }.is_transient());
        assert!(RemoteError::Status {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(RemoteError::Status {
            status: 429,
            message: "slow down".into()
        }
        .is_transient());

        assert!(!RemoteError::Status {
            status: 422,
            message: "invalid".into()
        }
        .is_transient());
        assert!(!RemoteError::AlreadyExists("x".into()).is_transient());
        assert!(!RemoteError::Auth("bad credentials".into()).is_transient());
    }

    #[test]
    fn test_retry_after_only_for_rate_limit() {
        let err = RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(42)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
        assert_eq!(RemoteError::Timeout("t".into()).retry_after(), None);
    }
}
