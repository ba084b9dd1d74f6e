//! Persistence contracts for bindings and roster lookups
//!
//! The store is the serialization point for concurrent provisioning: `claim`
//! must be atomic with respect to the (assignment, actor) key so that at most
//! one create call ever owns a binding.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    Actor, ActorRef, Assignment, AssignmentId, BindingId, BindingKey, BindingState,
    RemoteRepository, RepoBinding,
};

pub use memory::{MemoryBindingStore, MemoryRoster};

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write rejected by an invariant (unique key, immutable remote id)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Underlying storage failure
    #[error("Storage error: {0}")]
    Backend(String),
}

/// Outcome of claiming a binding for a create call
#[derive(Debug, Clone)]
pub enum Claim {
    /// No binding existed; a pending one was inserted for this claim
    Fresh(RepoBinding),
    /// The binding was in flight under this claim, or failed and taken over
    Resumed(RepoBinding),
    /// The binding is ready, scheduled for destruction, or owned by another claim
    Held(RepoBinding),
}

impl Claim {
    pub fn binding(&self) -> &RepoBinding {
        match self {
            Claim::Fresh(b) | Claim::Resumed(b) | Claim::Held(b) => b,
        }
    }
}

/// Storage of repository bindings
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Atomically insert a pending binding for `key` or report the existing one
    ///
    /// An in-flight binding is resumed by the claim that owns it, even when
    /// destruction was requested meanwhile. A failed binding not scheduled
    /// for destruction is handed over to the new claim and reset to `pending`
    /// or `created` depending on whether it has a remote repository.
    async fn claim(&self, key: BindingKey, claim: &str) -> StoreResult<Claim>;

    /// Get a binding by id
    async fn get(&self, id: BindingId) -> StoreResult<Option<RepoBinding>>;

    /// Find the binding of an actor for an assignment
    async fn find(&self, key: BindingKey) -> StoreResult<Option<RepoBinding>>;

    /// All bindings of an assignment
    async fn list_for_assignment(&self, assignment_id: AssignmentId)
        -> StoreResult<Vec<RepoBinding>>;

    /// All bindings owned by an actor, across assignments
    async fn list_for_actor(&self, actor: ActorRef) -> StoreResult<Vec<RepoBinding>>;

    /// Record the remote repository and move `pending` to `created`
    ///
    /// Recording the same repository again is a no-op; recording a different
    /// one is a [`StoreError::Conflict`].
    async fn record_remote(
        &self,
        id: BindingId,
        remote: &RemoteRepository,
    ) -> StoreResult<RepoBinding>;

    /// Move a binding to `state`, storing or clearing the last error
    async fn set_state(
        &self,
        id: BindingId,
        state: BindingState,
        last_error: Option<&str>,
    ) -> StoreResult<RepoBinding>;

    /// Flag a binding for destruction once provisioning settles
    async fn request_destroy(&self, id: BindingId) -> StoreResult<RepoBinding>;

    /// Delete the local record
    async fn delete(&self, id: BindingId) -> StoreResult<()>;
}

/// Read access to assignments and actors, owned by the roster services
#[async_trait]
pub trait Roster: Send + Sync {
    async fn assignment(&self, id: AssignmentId) -> StoreResult<Option<Assignment>>;

    async fn actor(&self, actor: ActorRef) -> StoreResult<Option<Actor>>;
}
