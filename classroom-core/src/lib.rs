//! Classroom Core - repository provisioning for classroom assignments
//!
//! Provisions one remote repository per (assignment, actor) pair, grants the
//! actor access, seeds starter code and tears the repository down again. The
//! work is driven from a durable queue so that remote failures are retried
//! off the request path.

pub mod config;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod model;
pub mod remote;
pub mod secrets;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use lifecycle::{ProvisionError, RepoLifecycle};
pub use remote::{RemoteError, RemoteResult, VersionControl};
pub use secrets::Secrets;
pub use store::{BindingStore, Roster, StoreError, StoreResult};
