//! Repository bindings stored in SQLite
//!
//! Claims never hold a transaction across statements: each step is a single
//! statement guarded by the unique (assignment, actor) key, so two workers
//! racing for the same key cannot both win.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classroom_core::model::{
    ActorRef, AssignmentId, BindingId, BindingKey, BindingState, RemoteRepository, RepoBinding,
};
use classroom_core::store::{BindingStore, Claim, StoreResult};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{to_i64, to_u64};
use crate::{Error, Result};

/// Row of the `repo_bindings` table
#[derive(Debug, Clone, sqlx::FromRow)]
struct BindingRow {
    id: i64,
    assignment_id: i64,
    actor_kind: String,
    actor_id: i64,
    remote_repo_id: Option<i64>,
    remote_full_name: Option<String>,
    state: String,
    claimed_by: String,
    destroy_requested: bool,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    ready_at: Option<DateTime<Utc>>,
}

impl BindingRow {
    fn into_binding(self) -> Result<RepoBinding> {
        let actor = ActorRef::from_parts(&self.actor_kind, self.actor_id)
            .map_err(|e| Error::InvalidData(e.to_string()))?;
        let state = self
            .state
            .parse::<BindingState>()
            .map_err(|e| Error::InvalidData(e.to_string()))?;
        let remote = match (self.remote_repo_id, self.remote_full_name) {
            (Some(id), Some(full_name)) => Some(RemoteRepository::new(
                to_u64(id, "remote repository id")?,
                full_name,
            )),
            (None, _) => None,
            (Some(id), None) => {
                return Err(Error::InvalidData(format!(
                    "binding {} records repository {} without a name",
                    self.id, id
                )))
            }
        };

        Ok(RepoBinding {
            id: BindingId(self.id),
            key: BindingKey::new(AssignmentId(self.assignment_id), actor),
            remote,
            state,
            claimed_by: self.claimed_by,
            destroy_requested: self.destroy_requested,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            ready_at: self.ready_at,
        })
    }
}

/// SQLite implementation of [`BindingStore`]
#[derive(Clone)]
pub struct SqliteBindingStore {
    pool: SqlitePool,
}

impl SqliteBindingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: BindingId) -> Result<Option<RepoBinding>> {
        sqlx::query_as::<_, BindingRow>("SELECT * FROM repo_bindings WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(BindingRow::into_binding)
            .transpose()
    }

    async fn fetch_by_key(&self, key: BindingKey) -> Result<Option<RepoBinding>> {
        sqlx::query_as::<_, BindingRow>(
            "SELECT * FROM repo_bindings WHERE assignment_id = ? AND actor_kind = ? AND actor_id = ?",
        )
        .bind(key.assignment_id.0)
        .bind(key.actor.kind())
        .bind(key.actor.raw_id())
        .fetch_optional(&self.pool)
        .await?
        .map(BindingRow::into_binding)
        .transpose()
    }

    async fn try_claim(&self, key: BindingKey, claim: &str) -> Result<Claim> {
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT INTO repo_bindings (
                assignment_id, actor_kind, actor_id, state, claimed_by,
                destroy_requested, created_at, updated_at
            )
            VALUES (?, ?, ?, 'pending', ?, 0, ?, ?)
            ON CONFLICT (assignment_id, actor_kind, actor_id) DO NOTHING
            "#,
        )
        .bind(key.assignment_id.0)
        .bind(key.actor.kind())
        .bind(key.actor.raw_id())
        .bind(claim)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            let binding = self
                .fetch(BindingId(inserted.last_insert_rowid()))
                .await?
                .ok_or_else(|| Error::NotFound(format!("binding {}", key)))?;
            debug!(%key, binding = %binding.id, claim, "Inserted pending binding");
            return Ok(Claim::Fresh(binding));
        }

        let taken_over = sqlx::query(
            r#"
            UPDATE repo_bindings
            SET claimed_by = ?,
                state = CASE WHEN remote_repo_id IS NULL THEN 'pending' ELSE 'created' END,
                last_error = NULL,
                updated_at = ?
            WHERE assignment_id = ? AND actor_kind = ? AND actor_id = ?
              AND state = 'failed' AND destroy_requested = 0
            "#,
        )
        .bind(claim)
        .bind(now)
        .bind(key.assignment_id.0)
        .bind(key.actor.kind())
        .bind(key.actor.raw_id())
        .execute(&self.pool)
        .await?;

        let existing = self
            .fetch_by_key(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("binding {}", key)))?;

        if taken_over.rows_affected() == 1 {
            debug!(%key, binding = %existing.id, claim, "Took over failed binding");
            return Ok(Claim::Resumed(existing));
        }
        if existing.state.is_in_flight() && existing.claimed_by == claim {
            return Ok(Claim::Resumed(existing));
        }
        Ok(Claim::Held(existing))
    }

    async fn store_remote(&self, id: BindingId, remote: &RemoteRepository) -> Result<RepoBinding> {
        let remote_id = to_i64(remote.id, "remote repository id")?;
        let row = sqlx::query_as::<_, BindingRow>(
            r#"
            UPDATE repo_bindings
            SET remote_repo_id = ?,
                remote_full_name = ?,
                state = CASE WHEN state = 'pending' THEN 'created' ELSE state END,
                updated_at = ?
            WHERE id = ? AND (remote_repo_id IS NULL OR remote_repo_id = ?)
            RETURNING *
            "#,
        )
        .bind(remote_id)
        .bind(&remote.full_name)
        .bind(Utc::now())
        .bind(id.0)
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)
        .map_err(|e| {
            if matches!(&e, Error::Sqlx(sqlx::Error::Database(db)) if db.is_unique_violation()) {
                Error::Conflict(format!(
                    "remote repository {} already bound in this assignment",
                    remote.id
                ))
            } else {
                e
            }
        })?;

        match row {
            Some(row) => row.into_binding(),
            None => match self.fetch(id).await? {
                Some(existing) => Err(Error::Conflict(format!(
                    "binding {} already records remote repository {}",
                    id,
                    existing.remote_id().unwrap_or_default()
                ))),
                None => Err(Error::NotFound(format!("binding {}", id))),
            },
        }
    }

    async fn update_state(
        &self,
        id: BindingId,
        state: BindingState,
        last_error: Option<&str>,
    ) -> Result<RepoBinding> {
        let now = Utc::now();
        sqlx::query_as::<_, BindingRow>(
            r#"
            UPDATE repo_bindings
            SET state = ?,
                last_error = ?,
                updated_at = ?,
                ready_at = CASE WHEN ? = 'ready' THEN ? ELSE ready_at END
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(state.as_str())
        .bind(last_error)
        .bind(now)
        .bind(state.as_str())
        .bind(now)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("binding {}", id)))?
        .into_binding()
    }

    async fn flag_destroy(&self, id: BindingId) -> Result<RepoBinding> {
        sqlx::query_as::<_, BindingRow>(
            "UPDATE repo_bindings SET destroy_requested = 1, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(Utc::now())
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("binding {}", id)))?
        .into_binding()
    }

    async fn list(&self, assignment_id: AssignmentId) -> Result<Vec<RepoBinding>> {
        sqlx::query_as::<_, BindingRow>(
            "SELECT * FROM repo_bindings WHERE assignment_id = ? ORDER BY id",
        )
        .bind(assignment_id.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(BindingRow::into_binding)
        .collect()
    }

    async fn list_by_actor(&self, actor: ActorRef) -> Result<Vec<RepoBinding>> {
        sqlx::query_as::<_, BindingRow>(
            "SELECT * FROM repo_bindings WHERE actor_kind = ? AND actor_id = ? ORDER BY id",
        )
        .bind(actor.kind())
        .bind(actor.raw_id())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(BindingRow::into_binding)
        .collect()
    }

    async fn remove(&self, id: BindingId) -> Result<()> {
        sqlx::query("DELETE FROM repo_bindings WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BindingStore for SqliteBindingStore {
    async fn claim(&self, key: BindingKey, claim: &str) -> StoreResult<Claim> {
        Ok(self.try_claim(key, claim).await?)
    }

    async fn get(&self, id: BindingId) -> StoreResult<Option<RepoBinding>> {
        Ok(self.fetch(id).await?)
    }

    async fn find(&self, key: BindingKey) -> StoreResult<Option<RepoBinding>> {
        Ok(self.fetch_by_key(key).await?)
    }

    async fn list_for_assignment(
        &self,
        assignment_id: AssignmentId,
    ) -> StoreResult<Vec<RepoBinding>> {
        Ok(self.list(assignment_id).await?)
    }

    async fn list_for_actor(&self, actor: ActorRef) -> StoreResult<Vec<RepoBinding>> {
        Ok(self.list_by_actor(actor).await?)
    }

    async fn record_remote(
        &self,
        id: BindingId,
        remote: &RemoteRepository,
    ) -> StoreResult<RepoBinding> {
        Ok(self.store_remote(id, remote).await?)
    }

    async fn set_state(
        &self,
        id: BindingId,
        state: BindingState,
        last_error: Option<&str>,
    ) -> StoreResult<RepoBinding> {
        Ok(self.update_state(id, state, last_error).await?)
    }

    async fn request_destroy(&self, id: BindingId) -> StoreResult<RepoBinding> {
        Ok(self.flag_destroy(id).await?)
    }

    async fn delete(&self, id: BindingId) -> StoreResult<()> {
        Ok(self.remove(id).await?)
    }
}
