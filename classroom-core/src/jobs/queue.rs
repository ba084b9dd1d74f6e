//! Durable job queue contract
//!
//! Jobs are delivered at least once: a reserved job carries a lease and is
//! handed out again when the lease lapses without an acknowledgement.
//! Terminal jobs stay in the queue as `failed` or `dead` until an operator
//! requeues them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ActorRef, AssignmentId};

/// Queue consumed by the provisioning job
pub const CREATE_REPOSITORY_QUEUE: &str = "create_repository";

/// Payload of a `create_repository` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub assignment_id: AssignmentId,
    pub actor: ActorRef,
}

impl ProvisionRequest {
    pub fn new(assignment_id: AssignmentId, actor: ActorRef) -> Self {
        Self {
            assignment_id,
            actor,
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

/// Queue-assigned job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for its run time
    Queued,
    /// Reserved by a worker under a lease
    Running,
    /// Acknowledged
    Done,
    /// Non-retryable failure
    Failed,
    /// Retries exhausted
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Failed or dead; waiting for an operator
    pub fn needs_attention(&self) -> bool {
        matches!(self, JobState::Failed | JobState::Dead)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "done" => Ok(JobState::Done),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(QueueError::InvalidState(format!(
                "unknown job state '{}'",
                other
            ))),
        }
    }
}

/// Stored job with its delivery bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    pub payload: String,
    pub state: JobState,
    /// Deliveries so far
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Earliest time the job may be delivered
    pub run_at: DateTime<Utc>,
    pub leased_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reserved job handed to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: JobId,
    pub queue: String,
    pub payload: String,
    /// 1-based number of this delivery
    pub attempt: u32,
}

impl Delivery {
    /// Claim token used by the lifecycle manager for this job
    pub fn claim(&self) -> String {
        format!("job-{}", self.id)
    }
}

/// Result type for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Queue failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Invalid job state: {0}")]
    InvalidState(String),

    #[error("Queue storage error: {0}")]
    Backend(String),
}

/// Durable named queues
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job that is deliverable immediately
    async fn enqueue(&self, queue: &str, payload: &str) -> QueueResult<JobId>;

    /// Reserve the oldest deliverable job of `queue` for `lease`
    ///
    /// Deliverable means queued with a run time in the past, or running with
    /// an expired lease.
    async fn reserve(&self, queue: &str, lease: Duration) -> QueueResult<Option<Delivery>>;

    /// Acknowledge a job
    async fn complete(&self, id: JobId) -> QueueResult<()>;

    /// Release a job for redelivery after `delay`
    async fn retry_later(&self, id: JobId, delay: Duration, error: &str) -> QueueResult<()>;

    /// Move a job to a terminal state (`failed` or `dead`)
    async fn fail(&self, id: JobId, state: JobState, error: &str) -> QueueResult<()>;

    async fn get(&self, id: JobId) -> QueueResult<Option<JobRecord>>;

    /// Jobs filtered by queue and state, oldest first
    async fn list(&self, queue: Option<&str>, state: Option<JobState>)
        -> QueueResult<Vec<JobRecord>>;

    /// Put a failed or dead job back in the queue with a fresh attempt budget
    async fn requeue(&self, id: JobId) -> QueueResult<JobRecord>;
}

/// `now + delay`, saturating on durations chrono cannot represent
pub fn deadline(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Reject terminal states other than `failed`/`dead` in [`JobQueue::fail`]
pub fn check_terminal(state: JobState) -> QueueResult<()> {
    if state.needs_attention() {
        Ok(())
    } else {
        Err(QueueError::InvalidState(format!(
            "{} is not a terminal failure state",
            state
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StudentId;

    #[test]
    fn test_payload_format() {
        let request = ProvisionRequest::new(AssignmentId(1), ActorRef::Student(StudentId(7)));
        let payload = request.to_payload().unwrap();
        assert_eq!(
            payload,
            r#"{"assignment_id":1,"actor":{"kind":"student","id":7}}"#
        );
        assert_eq!(ProvisionRequest::from_payload(&payload).unwrap(), request);
    }

    #[test]
    fn test_malformed_payload_rejected() {
        assert!(ProvisionRequest::from_payload("{\"assignment_id\":1}").is_err());
        assert!(ProvisionRequest::from_payload("not json").is_err());
    }

    #[test]
    fn test_job_state_parse() {
        assert_eq!("dead".parse::<JobState>().unwrap(), JobState::Dead);
        assert!("sleeping".parse::<JobState>().is_err());
        assert!(JobState::Failed.needs_attention());
        assert!(!JobState::Done.needs_attention());
    }

    #[test]
    fn test_deadline_saturates() {
        let now = Utc::now();
        assert_eq!(deadline(now, Duration::ZERO), now);
        assert_eq!(deadline(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_claim_is_stable_per_job() {
        let delivery = Delivery {
            id: JobId(12),
            queue: CREATE_REPOSITORY_QUEUE.to_string(),
            payload: String::new(),
            attempt: 3,
        };
        assert_eq!(delivery.claim(), "job-12");
    }
}
