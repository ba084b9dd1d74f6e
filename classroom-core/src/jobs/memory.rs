//! In-memory job queue

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::queue::{
    check_terminal, deadline, Delivery, JobId, JobQueue, JobRecord, JobState, QueueError,
    QueueResult,
};

#[derive(Debug, Default)]
struct Jobs {
    next_id: i64,
    rows: BTreeMap<JobId, JobRecord>,
}

impl Jobs {
    fn get_mut(&mut self, id: JobId) -> QueueResult<&mut JobRecord> {
        self.rows.get_mut(&id).ok_or(QueueError::NotFound(id))
    }
}

/// Job queue held in process memory; lost on restart
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<Jobs>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, queue: &str, payload: &str) -> QueueResult<JobId> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = JobId(inner.next_id);
        let now = Utc::now();
        inner.rows.insert(
            id,
            JobRecord {
                id,
                queue: queue.to_string(),
                payload: payload.to_string(),
                state: JobState::Queued,
                attempts: 0,
                last_error: None,
                run_at: now,
                leased_until: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn reserve(&self, queue: &str, lease: Duration) -> QueueResult<Option<Delivery>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let next = inner.rows.values_mut().find(|job| {
            job.queue == queue
                && match job.state {
                    JobState::Queued => job.run_at <= now,
                    JobState::Running => job.leased_until.is_some_and(|until| until <= now),
                    _ => false,
                }
        });

        Ok(next.map(|job| {
            job.state = JobState::Running;
            job.attempts += 1;
            job.leased_until = Some(deadline(now, lease));
            job.updated_at = now;
            Delivery {
                id: job.id,
                queue: job.queue.clone(),
                payload: job.payload.clone(),
                attempt: job.attempts,
            }
        }))
    }

    async fn complete(&self, id: JobId) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.get_mut(id)?;
        job.state = JobState::Done;
        job.leased_until = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn retry_later(&self, id: JobId, delay: Duration, error: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.get_mut(id)?;
        let now = Utc::now();
        job.state = JobState::Queued;
        job.run_at = deadline(now, delay);
        job.leased_until = None;
        job.last_error = Some(error.to_string());
        job.updated_at = now;
        Ok(())
    }

    async fn fail(&self, id: JobId, state: JobState, error: &str) -> QueueResult<()> {
        check_terminal(state)?;
        let mut inner = self.inner.lock().await;
        let job = inner.get_mut(id)?;
        job.state = state;
        job.leased_until = None;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.inner.lock().await.rows.get(&id).cloned())
    }

    async fn list(
        &self,
        queue: Option<&str>,
        state: Option<JobState>,
    ) -> QueueResult<Vec<JobRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .values()
            .filter(|job| queue.is_none_or(|q| job.queue == q))
            .filter(|job| state.is_none_or(|s| job.state == s))
            .cloned()
            .collect())
    }

    async fn requeue(&self, id: JobId) -> QueueResult<JobRecord> {
        let mut inner = self.inner.lock().await;
        let job = inner.get_mut(id)?;
        if !job.state.needs_attention() {
            return Err(QueueError::InvalidState(format!(
                "job {} is {}; only failed or dead jobs can be requeued",
                id, job.state
            )));
        }
        let now = Utc::now();
        job.state = JobState::Queued;
        job.attempts = 0;
        job.run_at = now;
        job.leased_until = None;
        job.updated_at = now;
        Ok(job.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q: &str = "create_repository";

    #[tokio::test]
    async fn test_reserve_is_exclusive_until_lease_expires() {
        let queue = MemoryQueue::new();
        let id = queue.enqueue(Q, "{}").await.unwrap();

        let first = queue.reserve(Q, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.id, id);
        assert_eq!(first.attempt, 1);

        // zero lease: redelivered immediately as if the worker died
        let second = queue.reserve(Q, Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(second.id, id);
        assert_eq!(second.attempt, 2);

        assert!(queue.reserve(Q, Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reserve_filters_by_queue() {
        let queue = MemoryQueue::new();
        queue.enqueue("other", "{}").await.unwrap();
        assert!(queue.reserve(Q, Duration::from_secs(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_later_delays_delivery() {
        let queue = MemoryQueue::new();
        let id = queue.enqueue(Q, "{}").await.unwrap();
        queue.reserve(Q, Duration::from_secs(60)).await.unwrap();

        queue
            .retry_later(id, Duration::from_secs(3600), "503")
            .await
            .unwrap();
        assert!(queue.reserve(Q, Duration::from_secs(60)).await.unwrap().is_none());

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.last_error.as_deref(), Some("503"));
    }

    #[tokio::test]
    async fn test_failed_jobs_kept_and_requeued() {
        let queue = MemoryQueue::new();
        let id = queue.enqueue(Q, "{}").await.unwrap();
        queue.reserve(Q, Duration::from_secs(60)).await.unwrap();
        queue.fail(id, JobState::Dead, "gave up").await.unwrap();

        let dead = queue.list(Some(Q), Some(JobState::Dead)).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 1);

        let job = queue.requeue(id).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.last_error.as_deref(), Some("gave up"));

        let delivery = queue.reserve(Q, Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(delivery.id, id);
        assert_eq!(delivery.attempt, 1);
    }

    #[tokio::test]
    async fn test_requeue_rejects_live_jobs() {
        let queue = MemoryQueue::new();
        let id = queue.enqueue(Q, "{}").await.unwrap();
        assert!(matches!(
            queue.requeue(id).await,
            Err(QueueError::InvalidState(_))
        ));
        assert!(matches!(
            queue.fail(id, JobState::Done, "x").await,
            Err(QueueError::InvalidState(_))
        ));
        assert_eq!(
            queue.requeue(JobId(99)).await.unwrap_err(),
            QueueError::NotFound(JobId(99))
        );
    }
}
