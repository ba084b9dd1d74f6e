//! In-memory store and roster

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{BindingStore, Claim, Roster, StoreError, StoreResult};
use crate::model::{
    Actor, ActorRef, Assignment, AssignmentId, BindingId, BindingKey, BindingState, Group,
    RemoteRepository, RepoBinding, Student,
};

#[derive(Debug, Default)]
struct Bindings {
    next_id: i64,
    rows: HashMap<BindingId, RepoBinding>,
}

impl Bindings {
    fn by_key(&self, key: &BindingKey) -> Option<&RepoBinding> {
        self.rows.values().find(|b| b.key == *key)
    }

    fn get_mut(&mut self, id: BindingId) -> StoreResult<&mut RepoBinding> {
        self.rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("binding {}", id)))
    }
}

/// Binding store held in process memory
#[derive(Debug, Default)]
pub struct MemoryBindingStore {
    inner: Mutex<Bindings>,
}

impl MemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored bindings
    pub async fn len(&self) -> usize {
        self.inner.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BindingStore for MemoryBindingStore {
    async fn claim(&self, key: BindingKey, claim: &str) -> StoreResult<Claim> {
        let mut inner = self.inner.lock().await;

        let Some(existing) = inner.by_key(&key).cloned() else {
            inner.next_id += 1;
            let binding = RepoBinding::pending(BindingId(inner.next_id), key, claim);
            inner.rows.insert(binding.id, binding.clone());
            return Ok(Claim::Fresh(binding));
        };

        if existing.state == BindingState::Ready {
            return Ok(Claim::Held(existing));
        }
        // the owner keeps going so that a deferred destroy sees every remote it made
        if existing.claimed_by == claim && existing.state.is_in_flight() {
            return Ok(Claim::Resumed(existing));
        }
        if existing.destroy_requested {
            return Ok(Claim::Held(existing));
        }
        if existing.state == BindingState::Failed {
            let binding = inner.get_mut(existing.id)?;
            binding.claimed_by = claim.to_string();
            binding.state = if binding.remote.is_some() {
                BindingState::Created
            } else {
                BindingState::Pending
            };
            binding.last_error = None;
            binding.updated_at = Utc::now();
            return Ok(Claim::Resumed(binding.clone()));
        }

        Ok(Claim::Held(existing))
    }

    async fn get(&self, id: BindingId) -> StoreResult<Option<RepoBinding>> {
        Ok(self.inner.lock().await.rows.get(&id).cloned())
    }

    async fn find(&self, key: BindingKey) -> StoreResult<Option<RepoBinding>> {
        Ok(self.inner.lock().await.by_key(&key).cloned())
    }

    async fn list_for_assignment(
        &self,
        assignment_id: AssignmentId,
    ) -> StoreResult<Vec<RepoBinding>> {
        let inner = self.inner.lock().await;
        let mut bindings: Vec<RepoBinding> = inner
            .rows
            .values()
            .filter(|b| b.key.assignment_id == assignment_id)
            .cloned()
            .collect();
        bindings.sort_by_key(|b| b.id);
        Ok(bindings)
    }

    async fn list_for_actor(
        &self,
        actor: ActorRef,
    ) -> StoreResult<Vec<RepoBinding>> {
        let inner = self.inner.lock().await;
        let mut bindings: Vec<RepoBinding> = inner
            .rows
            .values()
            .filter(|b| b.key.actor == actor)
            .cloned()
            .collect();
        bindings.sort_by_key(|b| b.id);
        Ok(bindings)
    }

    async fn record_remote(
        &self,
        id: BindingId,
        remote: &RemoteRepository,
    ) -> StoreResult<RepoBinding> {
        let mut inner = self.inner.lock().await;

        let assignment_id = inner.get_mut(id)?.key.assignment_id;
        let taken = inner.rows.values().any(|b| {
            b.id != id && b.key.assignment_id == assignment_id && b.remote_id() == Some(remote.id)
        });
        if taken {
            return Err(StoreError::Conflict(format!(
                "remote repository {} already bound in assignment {}",
                remote.id, assignment_id
            )));
        }

        let binding = inner.get_mut(id)?;
        match &binding.remote {
            Some(existing) if existing.id != remote.id => {
                return Err(StoreError::Conflict(format!(
                    "binding {} already records remote repository {}",
                    id, existing.id
                )));
            }
            Some(_) => {}
            None => binding.remote = Some(remote.clone()),
        }
        if binding.state == BindingState::Pending {
            binding.state = BindingState::Created;
        }
        binding.updated_at = Utc::now();
        Ok(binding.clone())
    }

    async fn set_state(
        &self,
        id: BindingId,
        state: BindingState,
        last_error: Option<&str>,
    ) -> StoreResult<RepoBinding> {
        let mut inner = self.inner.lock().await;
        let binding = inner.get_mut(id)?;
        let now = Utc::now();
        binding.state = state;
        binding.last_error = last_error.map(str::to_string);
        binding.updated_at = now;
        if state == BindingState::Ready {
            binding.ready_at = Some(now);
        }
        Ok(binding.clone())
    }

    async fn request_destroy(&self, id: BindingId) -> StoreResult<RepoBinding> {
        let mut inner = self.inner.lock().await;
        let binding = inner.get_mut(id)?;
        binding.destroy_requested = true;
        binding.updated_at = Utc::now();
        Ok(binding.clone())
    }

    async fn delete(&self, id: BindingId) -> StoreResult<()> {
        self.inner.lock().await.rows.remove(&id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RosterData {
    assignments: HashMap<AssignmentId, Assignment>,
    actors: HashMap<ActorRef, Actor>,
}

/// Roster held in process memory
#[derive(Debug, Default)]
pub struct MemoryRoster {
    inner: Mutex<RosterData>,
}

impl MemoryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_assignment(&self, assignment: Assignment) {
        self.inner
            .lock()
            .await
            .assignments
            .insert(assignment.id, assignment);
    }

    pub async fn add_student(&self, student: Student) {
        let actor = Actor::Student(student);
        self.inner
            .lock()
            .await
            .actors
            .insert(actor.reference(), actor);
    }

    pub async fn add_group(&self, group: Group) {
        let actor = Actor::Group(group);
        self.inner
            .lock()
            .await
            .actors
            .insert(actor.reference(), actor);
    }

    /// Drop an actor row, as the roster does when a student leaves; bindings stay
    pub async fn remove_actor(&self, actor: ActorRef) {
        self.inner.lock().await.actors.remove(&actor);
    }
}

#[async_trait]
impl Roster for MemoryRoster {
    async fn assignment(&self, id: AssignmentId) -> StoreResult<Option<Assignment>> {
        Ok(self.inner.lock().await.assignments.get(&id).cloned())
    }

    async fn actor(&self, actor: ActorRef) -> StoreResult<Option<Actor>> {
        Ok(self.inner.lock().await.actors.get(&actor).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StudentId;

    fn key(student: i64) -> BindingKey {
        BindingKey::new(AssignmentId(1), ActorRef::Student(StudentId(student)))
    }

    #[tokio::test]
    async fn test_claim_fresh_then_resume_same_claim() {
        let store = MemoryBindingStore::new();

        let first = store.claim(key(1), "job-1").await.unwrap();
        assert!(matches!(first, Claim::Fresh(_)));
        assert_eq!(first.binding().state, BindingState::Pending);

        let again = store.claim(key(1), "job-1").await.unwrap();
        assert!(matches!(again, Claim::Resumed(_)));
        assert_eq!(again.binding().id, first.binding().id);
    }

    #[tokio::test]
    async fn test_claim_held_by_other_claim() {
        let store = MemoryBindingStore::new();
        store.claim(key(1), "job-1").await.unwrap();

        let other = store.claim(key(1), "job-2").await.unwrap();
        assert!(matches!(other, Claim::Held(_)));
        assert_eq!(other.binding().claimed_by, "job-1");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_binding_taken_over() {
        let store = MemoryBindingStore::new();
        let binding = store.claim(key(1), "job-1").await.unwrap().binding().clone();
        store
            .record_remote(binding.id, &RemoteRepository::new(10, "org/a"))
            .await
            .unwrap();
        store
            .set_state(binding.id, BindingState::Failed, Some("boom"))
            .await
            .unwrap();

        let claim = store.claim(key(1), "job-2").await.unwrap();
        let Claim::Resumed(resumed) = claim else {
            panic!("expected resumed claim");
        };
        assert_eq!(resumed.claimed_by, "job-2");
        assert_eq!(resumed.state, BindingState::Created);
        assert!(resumed.last_error.is_none());
    }

    #[tokio::test]
    async fn test_remote_id_is_immutable() {
        let store = MemoryBindingStore::new();
        let binding = store.claim(key(1), "job-1").await.unwrap().binding().clone();

        let recorded = store
            .record_remote(binding.id, &RemoteRepository::new(10, "org/a"))
            .await
            .unwrap();
        assert_eq!(recorded.state, BindingState::Created);

        // same id again is fine
        store
            .record_remote(binding.id, &RemoteRepository::new(10, "org/a"))
            .await
            .unwrap();

        let err = store
            .record_remote(binding.id, &RemoteRepository::new(11, "org/b"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_remote_id_unique_within_assignment() {
        let store = MemoryBindingStore::new();
        let a = store.claim(key(1), "job-1").await.unwrap().binding().clone();
        let b = store.claim(key(2), "job-2").await.unwrap().binding().clone();

        store
            .record_remote(a.id, &RemoteRepository::new(10, "org/a"))
            .await
            .unwrap();
        let err = store
            .record_remote(b.id, &RemoteRepository::new(10, "org/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_ready_binding_is_held() {
        let store = MemoryBindingStore::new();
        let binding = store.claim(key(1), "job-1").await.unwrap().binding().clone();
        let ready = store
            .set_state(binding.id, BindingState::Ready, None)
            .await
            .unwrap();
        assert!(ready.ready_at.is_some());

        let claim = store.claim(key(1), "job-1").await.unwrap();
        assert!(matches!(claim, Claim::Held(_)));
    }
}
