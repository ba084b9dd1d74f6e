//! Failure taxonomy of repository provisioning

use thiserror::Error;

use crate::jobs::RetryPolicy;
use crate::model::BindingKey;
use crate::remote::RemoteError;
use crate::store::StoreError;

/// One account (or team) that could not be granted access
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountFailure {
    /// Login, or `team:<id>` for team grants
    pub account: String,
    pub error: RemoteError,
}

impl std::fmt::Display for AccountFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.account, self.error)
    }
}

/// Errors returned by the lifecycle manager
#[derive(Error, Debug, Clone)]
pub enum ProvisionError {
    /// Missing or malformed local input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The remote host rejected repository creation
    #[error("Creating repository {name} failed: {source}")]
    RemoteCreation { name: String, source: RemoteError },

    /// Team or collaborator grant failed; the repository exists
    #[error("Granting access to {repo} failed: {}", summarize(.failures))]
    AccessLink {
        repo: String,
        failures: Vec<AccountFailure>,
    },

    /// Starter code import failed; the repository is usable without it
    #[error("Importing starter code into {repo} failed: {source}")]
    StarterSeed { repo: String, source: RemoteError },

    /// Remote deletion failed; the local record is retained
    #[error("Deleting repository {repo_id} failed: {source}")]
    RemoteDeletion { repo_id: u64, source: RemoteError },

    /// Another create call owns the binding
    #[error("Binding {key} is being provisioned by {claimed_by}")]
    InProgress { key: BindingKey, claimed_by: String },

    /// The binding is waiting to be destroyed
    #[error("Binding {0} is scheduled for deletion")]
    ScheduledForDeletion(BindingKey),

    /// Local persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn summarize(failures: &[AccountFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ProvisionError {
    /// Whether the provisioning job should try again, and after what delay
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            ProvisionError::RemoteCreation { source, .. }
            | ProvisionError::RemoteDeletion { source, .. } => remote_policy(source),
            ProvisionError::AccessLink { failures, .. } => {
                let transient: Vec<&RemoteError> = failures
                    .iter()
                    .map(|f| &f.error)
                    .filter(|e| e.is_transient())
                    .collect();
                if transient.is_empty() {
                    RetryPolicy::NonRetryable
                } else {
                    RetryPolicy::Retryable {
                        after: transient.iter().filter_map(|e| e.retry_after()).max(),
                    }
                }
            }
            ProvisionError::Store(StoreError::Backend(_)) => RetryPolicy::Retryable { after: None },
            ProvisionError::Validation(_)
            | ProvisionError::StarterSeed { .. }
            | ProvisionError::InProgress { .. }
            | ProvisionError::ScheduledForDeletion(_)
            | ProvisionError::Store(_) => RetryPolicy::NonRetryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_policy().is_retryable()
    }
}

fn remote_policy(error: &RemoteError) -> RetryPolicy {
    if error.is_transient() {
        RetryPolicy::Retryable {
            after: error.retry_after(),
        }
    } else {
        RetryPolicy::NonRetryable
    }
}
