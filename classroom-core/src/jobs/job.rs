//! Provisioning job
//!
//! Runs [`RepoLifecycle::create`] for one `create_repository` message and
//! settles the message: acknowledged on success or duplicate delivery,
//! released for redelivery on transient failure, kept as `failed`/`dead`
//! otherwise.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::queue::{
    Delivery, JobId, JobQueue, JobState, ProvisionRequest, QueueError, QueueResult,
    CREATE_REPOSITORY_QUEUE,
};
use super::retry::{Backoff, RetryDecision};
use crate::lifecycle::{CreateOutcome, ProvisionError, RepoLifecycle};
use crate::model::{BindingId, BindingKey};
use crate::store::Roster;

/// How a delivery was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Acknowledged; the binding is ready (or was cancelled by a destroy)
    Completed(Option<BindingId>),
    /// Another job owns the binding; acknowledged without remote calls
    Duplicate,
    /// Released for redelivery after the delay
    Retrying(Duration),
    /// Terminal failure; kept for operator follow-up
    Failed(String),
    /// Retries exhausted; kept for operator follow-up
    Dead(String),
}

/// Executes provisioning requests taken from the queue
pub struct ProvisioningJob {
    lifecycle: RepoLifecycle,
    roster: Arc<dyn Roster>,
    queue: Arc<dyn JobQueue>,
    backoff: Backoff,
}

impl ProvisioningJob {
    pub fn new(
        lifecycle: RepoLifecycle,
        roster: Arc<dyn Roster>,
        queue: Arc<dyn JobQueue>,
        backoff: Backoff,
    ) -> Self {
        Self {
            lifecycle,
            roster,
            queue,
            backoff,
        }
    }

    /// Enqueue provisioning for one (assignment, actor) pair
    ///
    /// Enqueuing the same pair twice is harmless; the second job finds the
    /// binding ready or owned and finishes without remote calls.
    pub async fn enqueue(
        queue: &dyn JobQueue,
        request: &ProvisionRequest,
    ) -> QueueResult<JobId> {
        let payload = request
            .to_payload()
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let id = queue.enqueue(CREATE_REPOSITORY_QUEUE, &payload).await?;
        info!(job = %id, assignment = %request.assignment_id, actor = %request.actor, "Enqueued provisioning");
        Ok(id)
    }

    /// Run one delivery and settle it in the queue
    pub async fn perform(&self, delivery: &Delivery) -> JobOutcome {
        let request = match ProvisionRequest::from_payload(&delivery.payload) {
            Ok(request) => request,
            Err(e) => {
                let err = ProvisionError::Validation(format!("malformed payload: {}", e));
                return self.settle_error(delivery, None, err).await;
            }
        };
        let key = BindingKey::new(request.assignment_id, request.actor);
        info!(job = %delivery.id, attempt = delivery.attempt, %key, "Running provisioning job");

        match self.run(&request, &delivery.claim()).await {
            Ok(outcome) => {
                let binding = outcome.binding().map(|b| b.id);
                self.ack(delivery).await;
                JobOutcome::Completed(binding)
            }
            Err(ProvisionError::InProgress { claimed_by, .. }) => {
                info!(job = %delivery.id, %key, %claimed_by, "Duplicate delivery, binding owned elsewhere");
                self.ack(delivery).await;
                JobOutcome::Duplicate
            }
            Err(err) => self.settle_error(delivery, Some(key), err).await,
        }
    }

    async fn run(
        &self,
        request: &ProvisionRequest,
        claim: &str,
    ) -> Result<CreateOutcome, ProvisionError> {
        let assignment = self
            .roster
            .assignment(request.assignment_id)
            .await?
            .ok_or_else(|| {
                ProvisionError::Validation(format!(
                    "assignment {} not found",
                    request.assignment_id
                ))
            })?;
        let actor = self.roster.actor(request.actor).await?.ok_or_else(|| {
            ProvisionError::Validation(format!("{} not found", request.actor))
        })?;

        self.lifecycle.create(&assignment, &actor, claim).await
    }

    async fn settle_error(
        &self,
        delivery: &Delivery,
        key: Option<BindingKey>,
        err: ProvisionError,
    ) -> JobOutcome {
        let decision = self.backoff.decide(delivery.attempt, err.retry_policy());
        if let RetryDecision::RetryIn(delay) = decision {
            return self.release(delivery, delay, &err).await;
        }

        let mut err = err;
        if let Some(key) = key {
            if let Err(settle_err) = self.lifecycle.abandon(key, &delivery.claim(), &err).await {
                warn!(job = %delivery.id, %key, error = %settle_err, "Binding settled with its deferred destroy unfinished");
                // keep the job alive until the flagged binding is torn down
                if let RetryDecision::RetryIn(delay) =
                    self.backoff.decide(delivery.attempt, settle_err.retry_policy())
                {
                    return self.release(delivery, delay, &settle_err).await;
                }
                err = settle_err;
            }
        }

        let message = err.to_string();
        let (state, outcome) = if decision == RetryDecision::Exhausted {
            error!(job = %delivery.id, attempts = delivery.attempt, error = %message, "Provisioning retries exhausted");
            (JobState::Dead, JobOutcome::Dead(message.clone()))
        } else {
            error!(job = %delivery.id, error = %message, "Provisioning failed permanently");
            (JobState::Failed, JobOutcome::Failed(message.clone()))
        };
        if let Err(e) = self.queue.fail(delivery.id, state, &message).await {
            error!(job = %delivery.id, error = %e, "Failed to record job failure");
        }
        outcome
    }

    async fn release(&self, delivery: &Delivery, delay: Duration, err: &ProvisionError) -> JobOutcome {
        let message = err.to_string();
        warn!(job = %delivery.id, attempt = delivery.attempt, ?delay, error = %message, "Provisioning failed, will retry");
        if let Err(e) = self.queue.retry_later(delivery.id, delay, &message).await {
            error!(job = %delivery.id, error = %e, "Failed to release job");
        }
        JobOutcome::Retrying(delay)
    }

    async fn ack(&self, delivery: &Delivery) {
        // an unacknowledged job is redelivered after its lease and finds the binding ready
        if let Err(e) = self.queue.complete(delivery.id).await {
            error!(job = %delivery.id, error = %e, "Failed to acknowledge job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::memory::MemoryQueue;
    use crate::model::{ActorRef, AssignmentId, BindingState, StudentId};
    use crate::remote::RemoteError;
    use crate::store::{BindingStore, MemoryBindingStore, MemoryRoster};
    use crate::testing::{learn_elm, octocat, FakeRemote};

    struct Harness {
        remote: Arc<FakeRemote>,
        store: Arc<MemoryBindingStore>,
        queue: Arc<MemoryQueue>,
        job: ProvisioningJob,
    }

    async fn harness(max_attempts: u32) -> Harness {
        let remote = Arc::new(FakeRemote::new());
        let store = Arc::new(MemoryBindingStore::new());
        let roster = Arc::new(MemoryRoster::new());
        roster.add_assignment(learn_elm()).await;
        if let crate::model::Actor::Student(student) = octocat() {
            roster.add_student(student).await;
        }
        let queue = Arc::new(MemoryQueue::new());
        let lifecycle = RepoLifecycle::new(remote.clone(), store.clone());
        let backoff = Backoff {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        let job = ProvisioningJob::new(lifecycle, roster, queue.clone(), backoff);
        Harness {
            remote,
            store,
            queue,
            job,
        }
    }

    fn request() -> ProvisionRequest {
        ProvisionRequest::new(AssignmentId(1), ActorRef::Student(StudentId(7)))
    }

    async fn next(queue: &MemoryQueue) -> Delivery {
        queue
            .reserve(CREATE_REPOSITORY_QUEUE, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_transient_failures_retry_without_duplicates() {
        let h = harness(5).await;
        for _ in 0..2 {
            h.remote.fail_next_create(RemoteError::Status {
                status: 503,
                message: "unavailable".into(),
            });
        }
        let id = ProvisioningJob::enqueue(h.queue.as_ref(), &request())
            .await
            .unwrap();

        assert_eq!(
            h.job.perform(&next(&h.queue).await).await,
            JobOutcome::Retrying(Duration::ZERO)
        );
        assert_eq!(
            h.job.perform(&next(&h.queue).await).await,
            JobOutcome::Retrying(Duration::ZERO)
        );
        let third = next(&h.queue).await;
        assert_eq!(third.attempt, 3);
        assert!(matches!(
            h.job.perform(&third).await,
            JobOutcome::Completed(Some(_))
        ));

        assert_eq!(h.remote.repo_count(), 1);
        assert_eq!(
            h.queue.get(id).await.unwrap().unwrap().state,
            JobState::Done
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_go_dead_and_settle_binding() {
        let h = harness(2).await;
        for _ in 0..2 {
            h.remote
                .fail_next_create(RemoteError::Timeout("create".into()));
        }
        let id = ProvisioningJob::enqueue(h.queue.as_ref(), &request())
            .await
            .unwrap();

        h.job.perform(&next(&h.queue).await).await;
        let outcome = h.job.perform(&next(&h.queue).await).await;
        assert!(matches!(outcome, JobOutcome::Dead(_)));

        let job = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Dead);
        assert!(job.last_error.unwrap().contains("timed out"));

        let key = BindingKey::new(AssignmentId(1), ActorRef::Student(StudentId(7)));
        let binding = h.store.find(key).await.unwrap().unwrap();
        assert_eq!(binding.state, BindingState::Failed);

        // operator requeues; the same job id resumes the binding
        h.queue.requeue(id).await.unwrap();
        assert!(matches!(
            h.job.perform(&next(&h.queue).await).await,
            JobOutcome::Completed(Some(_))
        ));
        assert_eq!(h.remote.repo_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_deferred_destroy_keeps_job_alive() {
        let h = harness(5).await;
        h.remote
            .fail_next_create(RemoteError::Timeout("create".into()));
        let id = ProvisioningJob::enqueue(h.queue.as_ref(), &request())
            .await
            .unwrap();
        assert!(matches!(
            h.job.perform(&next(&h.queue).await).await,
            JobOutcome::Retrying(_)
        ));

        let key = BindingKey::new(AssignmentId(1), ActorRef::Student(StudentId(7)));
        let binding = h.store.find(key).await.unwrap().unwrap();
        h.job.lifecycle.destroy(binding.id).await.unwrap();
        h.remote.fail_next_delete(RemoteError::Status {
            status: 503,
            message: "down".into(),
        });

        // creation finishes, the deferred teardown fails and is retried
        assert!(matches!(
            h.job.perform(&next(&h.queue).await).await,
            JobOutcome::Retrying(_)
        ));
        assert_eq!(h.remote.repo_count(), 1);

        assert_eq!(
            h.job.perform(&next(&h.queue).await).await,
            JobOutcome::Completed(None)
        );
        assert_eq!(h.remote.repo_count(), 0);
        assert!(h.store.find(key).await.unwrap().is_none());
        assert_eq!(
            h.queue.get(id).await.unwrap().unwrap().state,
            JobState::Done
        );
    }

    #[tokio::test]
    async fn test_validation_failure_is_not_retried() {
        let h = harness(5).await;
        let missing = ProvisionRequest::new(AssignmentId(99), ActorRef::Student(StudentId(7)));
        let id = ProvisioningJob::enqueue(h.queue.as_ref(), &missing)
            .await
            .unwrap();

        let outcome = h.job.perform(&next(&h.queue).await).await;
        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert_eq!(
            h.queue.get(id).await.unwrap().unwrap().state,
            JobState::Failed
        );
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_fails() {
        let h = harness(5).await;
        let id = h
            .queue
            .enqueue(CREATE_REPOSITORY_QUEUE, "{\"nope\":true}")
            .await
            .unwrap();
        let outcome = h.job.perform(&next(&h.queue).await).await;
        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert_eq!(
            h.queue.get(id).await.unwrap().unwrap().state,
            JobState::Failed
        );
    }

    #[tokio::test]
    async fn test_duplicate_job_is_acknowledged() {
        let h = harness(5).await;
        h.remote
            .fail_next_create(RemoteError::Network("reset".into()));
        ProvisioningJob::enqueue(h.queue.as_ref(), &request())
            .await
            .unwrap();
        let dup = ProvisioningJob::enqueue(h.queue.as_ref(), &request())
            .await
            .unwrap();

        let first = next(&h.queue).await;
        let second = next(&h.queue).await;
        assert_eq!(second.id, dup);

        // first job claims the binding and is released for retry
        assert!(matches!(
            h.job.perform(&first).await,
            JobOutcome::Retrying(_)
        ));
        assert_eq!(h.job.perform(&second).await, JobOutcome::Duplicate);
        assert_eq!(
            h.queue.get(dup).await.unwrap().unwrap().state,
            JobState::Done
        );
        assert_eq!(h.remote.creates(), 1);
    }

    #[tokio::test]
    async fn test_reenqueue_after_ready_is_noop() {
        let h = harness(5).await;
        ProvisioningJob::enqueue(h.queue.as_ref(), &request())
            .await
            .unwrap();
        h.job.perform(&next(&h.queue).await).await;

        ProvisioningJob::enqueue(h.queue.as_ref(), &request())
            .await
            .unwrap();
        assert!(matches!(
            h.job.perform(&next(&h.queue).await).await,
            JobOutcome::Completed(Some(_))
        ));
        assert_eq!(h.remote.creates(), 1);
    }
}
