//! Repository binding lifecycle
//!
//! Creation, access linking and destruction of the remote repository that
//! backs one actor's copy of an assignment.

pub mod access;
pub mod error;
pub mod manager;
pub mod naming;

pub use access::{AccessLinker, LinkReport};
pub use error::{AccountFailure, ProvisionError};
pub use manager::{CreateOutcome, DestroyOutcome, Provisioned, RepoLifecycle, TeardownReport};
pub use naming::{repo_name, MAX_REPO_NAME_LEN};
