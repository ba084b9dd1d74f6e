//! Worker pool consuming the `create_repository` queue
//!
//! Each worker reserves one job at a time and runs it to completion; a
//! cancelled pool stops reserving and waits for the jobs it holds.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::job::{JobOutcome, ProvisioningJob};
use super::queue::{JobQueue, QueueResult, CREATE_REPOSITORY_QUEUE};
use crate::config::WorkerConfig;

/// Pool of workers sharing one queue and one provisioning job
pub struct WorkerPool {
    job: Arc<ProvisioningJob>,
    queue: Arc<dyn JobQueue>,
    config: WorkerConfig,
    lease: Duration,
}

impl WorkerPool {
    pub fn new(
        job: Arc<ProvisioningJob>,
        queue: Arc<dyn JobQueue>,
        config: WorkerConfig,
        lease: Duration,
    ) -> Self {
        Self {
            job,
            queue,
            config,
            lease,
        }
    }

    /// Reserve and run at most one job
    pub async fn run_once(&self) -> QueueResult<Option<JobOutcome>> {
        let Some(delivery) = self
            .queue
            .reserve(CREATE_REPOSITORY_QUEUE, self.lease)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(self.job.perform(&delivery).await))
    }

    /// Run jobs until no job is deliverable right now
    pub async fn drain(&self) -> QueueResult<Vec<JobOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_once().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Run the pool until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let workers = self.config.concurrency.max(1);
        info!(workers, queue = CREATE_REPOSITORY_QUEUE, "Starting worker pool");

        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { pool.worker_loop(worker, shutdown).await });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }

    async fn worker_loop(&self, worker: usize, shutdown: CancellationToken) {
        debug!(worker, "Worker started");
        while !shutdown.is_cancelled() {
            let idle = match self.run_once().await {
                Ok(Some(outcome)) => {
                    debug!(worker, ?outcome, "Job finished");
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    error!(worker, error = %e, "Failed to reserve job");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
        debug!(worker, "Worker stopped");
    }
}
