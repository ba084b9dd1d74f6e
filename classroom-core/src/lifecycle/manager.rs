//! Repository lifecycle manager
//!
//! Drives one binding through its states with explicit, ordered steps:
//!
//! ```text
//! validate -> claim -> create remote (record id) -> link access -> seed starter code -> ready
//! ```
//!
//! The remote id is persisted before any later step runs, so a crash after
//! creation never loses track of a repository. A failed access grant keeps the
//! binding and its remote id; a failed starter import only produces a warning.
//!
//! Destruction removes the remote repository first and the local record
//! second. Bindings still being provisioned are flagged and torn down by the
//! create call once it settles.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::access::{AccessLinker, LinkReport};
use super::error::{AccountFailure, ProvisionError};
use super::naming::repo_name;
use crate::model::{
    Actor, ActorRef, Assignment, AssignmentId, BindingId, BindingKey, BindingState,
    RemoteRepository, RepoBinding,
};
use crate::remote::{RemoteError, VersionControl};
use crate::store::{BindingStore, Claim};

/// Successful provisioning of a binding
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub binding: RepoBinding,
    /// Who received access
    pub access: LinkReport,
    /// Soft failure of the starter code import
    pub starter_seed: Option<ProvisionError>,
}

/// Result of a create call
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// The binding was provisioned by this call
    Ready(Provisioned),
    /// The binding was already ready; nothing was done
    AlreadyReady(RepoBinding),
    /// Destruction was requested while provisioning; the binding is gone
    Cancelled(BindingKey),
}

impl CreateOutcome {
    pub fn binding(&self) -> Option<&RepoBinding> {
        match self {
            CreateOutcome::Ready(p) => Some(&p.binding),
            CreateOutcome::AlreadyReady(b) => Some(b),
            CreateOutcome::Cancelled(_) => None,
        }
    }
}

/// Result of a destroy call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// Remote repository (if any) and local record removed
    Destroyed,
    /// Provisioning is in flight; teardown happens when it settles
    Deferred,
    /// No such binding
    AlreadyGone,
}

/// Teardown of a batch of bindings
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub destroyed: Vec<BindingId>,
    pub deferred: Vec<BindingId>,
    pub failed: Vec<(BindingId, ProvisionError)>,
}

/// Owns the state transitions of repository bindings
#[derive(Clone)]
pub struct RepoLifecycle {
    remote: Arc<dyn VersionControl>,
    store: Arc<dyn BindingStore>,
    linker: AccessLinker,
}

impl RepoLifecycle {
    pub fn new(remote: Arc<dyn VersionControl>, store: Arc<dyn BindingStore>) -> Self {
        let linker = AccessLinker::new(remote.clone());
        Self {
            remote,
            store,
            linker,
        }
    }

    pub fn store(&self) -> &Arc<dyn BindingStore> {
        &self.store
    }

    /// Provision the repository of `actor` for `assignment`
    ///
    /// `claim` identifies the caller; a retry with the same claim resumes the
    /// binding where the previous attempt stopped. A binding owned by a
    /// different claim is left alone and reported as
    /// [`ProvisionError::InProgress`] without any remote call.
    pub async fn create(
        &self,
        assignment: &Assignment,
        actor: &Actor,
        claim: &str,
    ) -> Result<CreateOutcome, ProvisionError> {
        let name = validate(assignment, actor)?;
        let key = BindingKey::new(assignment.id, actor.reference());

        let binding = match self.store.claim(key, claim).await? {
            // settled, but an earlier deferred teardown did not finish
            Claim::Held(existing) if existing.destroy_requested && !existing.state.is_in_flight() => {
                info!(%key, binding = %existing.id, state = %existing.state, "Finishing deferred destroy");
                self.teardown(existing).await?;
                return Ok(CreateOutcome::Cancelled(key));
            }
            Claim::Held(existing) if existing.is_ready() => {
                debug!(%key, binding = %existing.id, "Binding already ready");
                return Ok(CreateOutcome::AlreadyReady(existing));
            }
            Claim::Held(existing) if existing.destroy_requested => {
                return Err(ProvisionError::ScheduledForDeletion(key));
            }
            Claim::Held(existing) => {
                info!(%key, claimed_by = %existing.claimed_by, "Binding owned by another attempt");
                return Err(ProvisionError::InProgress {
                    key,
                    claimed_by: existing.claimed_by,
                });
            }
            Claim::Fresh(binding) => {
                info!(%key, binding = %binding.id, repo = %name, "Provisioning repository");
                binding
            }
            Claim::Resumed(binding) => {
                info!(%key, binding = %binding.id, state = %binding.state, "Resuming provisioning");
                binding
            }
        };

        match self.provision(assignment, actor, &name, binding.clone()).await {
            Ok(provisioned) => {
                if provisioned.binding.destroy_requested {
                    info!(%key, "Destroy requested during provisioning, tearing down");
                    self.teardown(provisioned.binding).await?;
                    return Ok(CreateOutcome::Cancelled(key));
                }
                Ok(CreateOutcome::Ready(provisioned))
            }
            Err(err) if err.is_retryable() => {
                warn!(%key, error = %err, "Provisioning interrupted by a transient failure");
                Err(err)
            }
            Err(err) => {
                error!(%key, error = %err, "Provisioning failed");
                // a pending teardown outranks the provisioning error
                self.settle_failed(binding.id, &err).await?;
                Err(err)
            }
        }
    }

    async fn provision(
        &self,
        assignment: &Assignment,
        actor: &Actor,
        name: &str,
        binding: RepoBinding,
    ) -> Result<Provisioned, ProvisionError> {
        let remote = match binding.remote.clone() {
            Some(remote) => {
                debug!(binding = %binding.id, repo = %remote.full_name, "Remote repository already recorded");
                remote
            }
            None => {
                let remote = self.create_remote(assignment, name).await?;
                self.store.record_remote(binding.id, &remote).await?;
                info!(binding = %binding.id, repo = %remote.full_name, repo_id = remote.id, "Recorded remote repository");
                remote
            }
        };

        let access = self
            .linker
            .link(actor, &remote, assignment.permission())
            .await;
        if access.is_total_failure() {
            return Err(ProvisionError::AccessLink {
                repo: remote.full_name.clone(),
                failures: access.failures,
            });
        }
        if access.is_partial() {
            warn!(
                repo = %remote.full_name,
                failed = ?failed_accounts(&access.failures),
                "Some accounts were not granted access"
            );
        }

        let starter_seed = match assignment.starter_code_repo_id {
            Some(source) => match self
                .remote
                .push_starter_code(&remote.full_name, source)
                .await
            {
                Ok(()) => {
                    debug!(repo = %remote.full_name, source, "Started starter code import");
                    None
                }
                Err(source_err) => {
                    let err = ProvisionError::StarterSeed {
                        repo: remote.full_name.clone(),
                        source: source_err,
                    };
                    warn!(error = %err, "Repository left without starter code");
                    Some(err)
                }
            },
            None => None,
        };

        let warning = starter_seed.as_ref().map(ToString::to_string);
        let binding = self
            .store
            .set_state(binding.id, BindingState::Ready, warning.as_deref())
            .await?;
        info!(binding = %binding.id, repo = %remote.full_name, "Binding ready");

        Ok(Provisioned {
            binding,
            access,
            starter_seed,
        })
    }

    /// Create the remote repository, adopting one that already exists under the name
    async fn create_remote(
        &self,
        assignment: &Assignment,
        name: &str,
    ) -> Result<RemoteRepository, ProvisionError> {
        let org = &assignment.organization;
        match self
            .remote
            .create_org_repo(org, name, assignment.visibility)
            .await
        {
            Ok(repo) => Ok(repo),
            Err(RemoteError::AlreadyExists(_)) => {
                info!(org = %org.login, repo = name, "Repository already exists, adopting it");
                self.remote
                    .find_org_repo(org, name)
                    .await
                    .map_err(|source| ProvisionError::RemoteCreation {
                        name: name.to_string(),
                        source,
                    })
            }
            Err(source) => Err(ProvisionError::RemoteCreation {
                name: name.to_string(),
                source,
            }),
        }
    }

    /// Mark an in-flight binding failed after a terminal error
    ///
    /// Runs a deferred destroy if one was requested meanwhile. Called by the
    /// job layer when retries are exhausted. An error means the binding is
    /// settled but still flagged; the next create for its key retries the
    /// teardown.
    pub async fn settle_failed(
        &self,
        id: BindingId,
        err: &ProvisionError,
    ) -> Result<(), ProvisionError> {
        let binding = self
            .store
            .set_state(id, BindingState::Failed, Some(&err.to_string()))
            .await?;

        if binding.destroy_requested {
            info!(binding = %id, "Running deferred destroy");
            if let Err(teardown_err) = self.teardown(binding).await {
                error!(binding = %id, error = %teardown_err, "Deferred destroy failed");
                return Err(teardown_err);
            }
        }
        Ok(())
    }

    /// Settle the binding of `key` held by `claim` as failed, if still in flight
    pub async fn abandon(
        &self,
        key: BindingKey,
        claim: &str,
        err: &ProvisionError,
    ) -> Result<(), ProvisionError> {
        if let Some(binding) = self.store.find(key).await? {
            if binding.claimed_by == claim && binding.state.is_in_flight() {
                self.settle_failed(binding.id, err).await?;
            }
        }
        Ok(())
    }

    /// Destroy a binding and its remote repository
    ///
    /// In-flight bindings are flagged instead and destroyed when provisioning
    /// settles.
    pub async fn destroy(&self, id: BindingId) -> Result<DestroyOutcome, ProvisionError> {
        let Some(binding) = self.store.get(id).await? else {
            return Ok(DestroyOutcome::AlreadyGone);
        };

        if binding.state.is_in_flight() {
            let flagged = self.store.request_destroy(id).await?;
            // provisioning may have settled between the read and the flag
            if flagged.state.is_in_flight() {
                info!(binding = %id, state = %flagged.state, "Binding in flight, destroy deferred");
                return Ok(DestroyOutcome::Deferred);
            }
            self.teardown(flagged).await?;
            return Ok(DestroyOutcome::Destroyed);
        }

        self.teardown(binding).await?;
        Ok(DestroyOutcome::Destroyed)
    }

    /// Destroy regardless of provisioning state
    ///
    /// For operator use when the owning attempt is known to be gone.
    pub async fn force_destroy(&self, id: BindingId) -> Result<DestroyOutcome, ProvisionError> {
        match self.store.get(id).await? {
            Some(binding) => {
                warn!(binding = %id, state = %binding.state, "Forcing destroy");
                self.teardown(binding).await?;
                Ok(DestroyOutcome::Destroyed)
            }
            None => Ok(DestroyOutcome::AlreadyGone),
        }
    }

    /// Destroy every binding of an assignment; failures are collected, not fatal
    pub async fn destroy_assignment(
        &self,
        assignment_id: AssignmentId,
    ) -> Result<TeardownReport, ProvisionError> {
        let bindings = self.store.list_for_assignment(assignment_id).await?;
        let teardown = self.destroy_all(bindings).await;
        info!(
            assignment = %assignment_id,
            destroyed = teardown.destroyed.len(),
            deferred = teardown.deferred.len(),
            failed = teardown.failed.len(),
            "Assignment teardown finished"
        );
        Ok(teardown)
    }

    /// Destroy every binding owned by a student or group
    pub async fn destroy_actor(&self, actor: ActorRef) -> Result<TeardownReport, ProvisionError> {
        let bindings = self.store.list_for_actor(actor).await?;
        let teardown = self.destroy_all(bindings).await;
        info!(
            %actor,
            destroyed = teardown.destroyed.len(),
            deferred = teardown.deferred.len(),
            failed = teardown.failed.len(),
            "Actor teardown finished"
        );
        Ok(teardown)
    }

    async fn destroy_all(&self, bindings: Vec<RepoBinding>) -> TeardownReport {
        let mut teardown = TeardownReport::default();
        for binding in bindings {
            match self.destroy(binding.id).await {
                Ok(DestroyOutcome::Deferred) => teardown.deferred.push(binding.id),
                Ok(_) => teardown.destroyed.push(binding.id),
                Err(err) => {
                    warn!(binding = %binding.id, error = %err, "Failed to destroy binding");
                    teardown.failed.push((binding.id, err));
                }
            }
        }
        teardown
    }

    /// Delete remote first, local second; keep the local record if remote deletion fails
    async fn teardown(&self, binding: RepoBinding) -> Result<(), ProvisionError> {
        if let Some(remote) = &binding.remote {
            match self.remote.delete_repo(remote.id).await {
                Ok(()) => {
                    info!(binding = %binding.id, repo = %remote.full_name, repo_id = remote.id, "Deleted remote repository");
                }
                Err(RemoteError::NotFound(_)) => {
                    debug!(binding = %binding.id, repo_id = remote.id, "Remote repository already gone");
                }
                Err(source) => {
                    let err = ProvisionError::RemoteDeletion {
                        repo_id: remote.id,
                        source,
                    };
                    if let Err(store_err) = self
                        .store
                        .set_state(binding.id, binding.state, Some(&err.to_string()))
                        .await
                    {
                        warn!(binding = %binding.id, error = %store_err, "Could not record deletion failure");
                    }
                    return Err(err);
                }
            }
        }

        self.store.delete(binding.id).await?;
        Ok(())
    }
}

/// Check local inputs and derive the repository name
fn validate(assignment: &Assignment, actor: &Actor) -> Result<String, ProvisionError> {
    if assignment.organization.login.trim().is_empty() {
        return Err(ProvisionError::Validation(format!(
            "assignment {} has no organization",
            assignment.id
        )));
    }
    if assignment.starter_code_repo_id == Some(0) {
        return Err(ProvisionError::Validation(format!(
            "assignment {} has an invalid starter code source",
            assignment.id
        )));
    }
    if let Actor::Group(group) = actor {
        if group.team_id.is_none() && group.repo_accesses.is_empty() {
            return Err(ProvisionError::Validation(format!(
                "group {} has neither a team nor members",
                group.slug
            )));
        }
    }

    repo_name(assignment, actor).ok_or_else(|| {
        ProvisionError::Validation(format!(
            "cannot derive a repository name from '{}' and '{}'",
            assignment.slug,
            actor.slug()
        ))
    })
}

fn failed_accounts(failures: &[AccountFailure]) -> Vec<&str> {
    failures.iter().map(|f| f.account.as_str()).collect()
}
