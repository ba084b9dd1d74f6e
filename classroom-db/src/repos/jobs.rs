//! Durable job queue stored in SQLite

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classroom_core::jobs::queue::{check_terminal, deadline};
use classroom_core::jobs::{
    Delivery, JobId, JobQueue, JobRecord, JobState, QueueError, QueueResult,
};
use sqlx::SqlitePool;
use tracing::debug;

use crate::{Error, Result};

/// Row of the `jobs` table
#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: i64,
    queue: String,
    payload: String,
    state: String,
    attempts: i64,
    last_error: Option<String>,
    run_at: i64,
    leased_until: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_record(self) -> Result<JobRecord> {
        Ok(JobRecord {
            id: JobId(self.id),
            queue: self.queue,
            payload: self.payload,
            state: self
                .state
                .parse::<JobState>()
                .map_err(|e| Error::InvalidData(e.to_string()))?,
            attempts: attempts(self.attempts)?,
            last_error: self.last_error,
            run_at: from_millis(self.run_at)?,
            leased_until: self.leased_until.map(from_millis).transpose()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn into_delivery(self) -> Result<Delivery> {
        Ok(Delivery {
            id: JobId(self.id),
            queue: self.queue,
            payload: self.payload,
            attempt: attempts(self.attempts)?,
        })
    }
}

fn attempts(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidData(format!("attempt count {}", value)))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| Error::InvalidData(format!("timestamp {} out of range", ms)))
}

fn millis_after(now: DateTime<Utc>, delay: Duration) -> i64 {
    deadline(now, delay).timestamp_millis()
}

/// SQLite implementation of [`JobQueue`]
#[derive(Clone)]
pub struct SqliteJobQueue {
    pool: SqlitePool,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert(&self, queue: &str, payload: &str) -> Result<JobId> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (queue, payload, state, attempts, run_at, created_at, updated_at)
            VALUES (?, ?, 'queued', 0, ?, ?, ?)
            "#,
        )
        .bind(queue)
        .bind(payload)
        .bind(now.timestamp_millis())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(JobId(result.last_insert_rowid()))
    }

    async fn take_next(&self, queue: &str, lease: Duration) -> Result<Option<Delivery>> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        // single statement, so two workers never reserve the same row
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'running',
                attempts = attempts + 1,
                leased_until = ?,
                updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ?
                  AND ((state = 'queued' AND run_at <= ?)
                    OR (state = 'running' AND leased_until <= ?))
                ORDER BY id
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(millis_after(now, lease))
        .bind(now)
        .bind(queue)
        .bind(now_ms)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?;

        let delivery = row.map(JobRow::into_delivery).transpose()?;
        if let Some(delivery) = &delivery {
            debug!(job = %delivery.id, attempt = delivery.attempt, queue, "Reserved job");
        }
        Ok(delivery)
    }

    async fn update(
        &self,
        id: JobId,
        state: JobState,
        run_at_ms: Option<i64>,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?,
                run_at = COALESCE(?, run_at),
                leased_until = NULL,
                last_error = COALESCE(?, last_error),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(state.as_str())
        .bind(run_at_ms)
        .bind(error)
        .bind(Utc::now())
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(id.0));
        }
        Ok(())
    }

    async fn fetch(&self, id: JobId) -> Result<Option<JobRecord>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(JobRow::into_record)
            .transpose()
    }

    async fn select(&self, queue: Option<&str>, state: Option<JobState>) -> Result<Vec<JobRecord>> {
        sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE (? IS NULL OR queue = ?)
              AND (? IS NULL OR state = ?)
            ORDER BY id
            "#,
        )
        .bind(queue)
        .bind(queue)
        .bind(state.map(|s| s.as_str()))
        .bind(state.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(JobRow::into_record)
        .collect()
    }

    async fn reset(&self, id: JobId) -> Result<JobRecord> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'queued',
                attempts = 0,
                run_at = ?,
                leased_until = NULL,
                updated_at = ?
            WHERE id = ? AND state IN ('failed', 'dead')
            RETURNING *
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(now)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_record(),
            None => match self.fetch(id).await? {
                Some(job) => Err(Error::InvalidState(format!(
                    "job {} is {}; only failed or dead jobs can be requeued",
                    id, job.state
                ))),
                None => Err(Error::JobNotFound(id.0)),
            },
        }
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, queue: &str, payload: &str) -> QueueResult<JobId> {
        Ok(self.insert(queue, payload).await?)
    }

    async fn reserve(&self, queue: &str, lease: Duration) -> QueueResult<Option<Delivery>> {
        Ok(self.take_next(queue, lease).await?)
    }

    async fn complete(&self, id: JobId) -> QueueResult<()> {
        Ok(self.update(id, JobState::Done, None, None).await?)
    }

    async fn retry_later(&self, id: JobId, delay: Duration, error: &str) -> QueueResult<()> {
        let run_at = millis_after(Utc::now(), delay);
        Ok(self
            .update(id, JobState::Queued, Some(run_at), Some(error))
            .await?)
    }

    async fn fail(&self, id: JobId, state: JobState, error: &str) -> QueueResult<()> {
        check_terminal(state)?;
        Ok(self.update(id, state, None, Some(error)).await?)
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.fetch(id).await?)
    }

    async fn list(
        &self,
        queue: Option<&str>,
        state: Option<JobState>,
    ) -> QueueResult<Vec<JobRecord>> {
        Ok(self.select(queue, state).await?)
    }

    async fn requeue(&self, id: JobId) -> QueueResult<JobRecord> {
        self.reset(id).await.map_err(QueueError::from)
    }
}
