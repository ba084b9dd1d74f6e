//! Queued provisioning
//!
//! - [`queue`]: the durable queue contract and the `create_repository` payload
//! - [`retry`]: retry classification and backoff
//! - [`job`]: the provisioning job run for each delivery
//! - [`worker`]: the pool that consumes the queue

pub mod job;
pub mod memory;
pub mod queue;
pub mod retry;
pub mod worker;

pub use job::{JobOutcome, ProvisioningJob};
pub use memory::MemoryQueue;
pub use queue::{
    Delivery, JobId, JobQueue, JobRecord, JobState, ProvisionRequest, QueueError, QueueResult,
    CREATE_REPOSITORY_QUEUE,
};
pub use retry::{Backoff, RetryDecision, RetryPolicy};
pub use worker::WorkerPool;
